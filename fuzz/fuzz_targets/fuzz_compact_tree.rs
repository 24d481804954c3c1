//! Fuzz testing for compact tree operations.
//!
//! Drives random insert/remove/lookup/commit sequences against a
//! `BTreeMap` model. Any mismatch, error or panic is a bug.

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use compact_tree::{CompactTree, DictionaryRegistry, MemoryPageStore, TreeConfig};

#[derive(Debug, Arbitrary)]
struct TreeInput {
    train_threshold: u8,
    operations: Vec<TreeOperation>,
}

#[derive(Debug, Arbitrary)]
enum TreeOperation {
    Add { key: Vec<u8>, value: u64 },
    Remove { key: Vec<u8> },
    Get { key: Vec<u8> },
    NextValue { key: Vec<u8> },
    ResetIteration,
    Commit,
}

fn usable(key: &[u8]) -> bool {
    !key.is_empty() && key.len() <= 1024
}

fuzz_target!(|input: TreeInput| {
    let mut store = MemoryPageStore::new();
    let registry = DictionaryRegistry::new();
    let config = TreeConfig::default()
        .with_train_threshold(u64::from(input.train_threshold).max(1))
        .with_verify_pages(true);
    let mut tree = CompactTree::create(&mut store, &registry, config).unwrap();
    let mut model: BTreeMap<Vec<u8>, i64> = BTreeMap::new();

    for op in input.operations {
        match op {
            TreeOperation::Add { key, value } => {
                let value = (value >> 1) as i64;
                if usable(&key) {
                    tree.add(&key, value).unwrap();
                    model.insert(key, value);
                } else {
                    assert!(tree.add(&key, value).is_err());
                }
            }
            TreeOperation::Remove { key } if usable(&key) => {
                assert_eq!(tree.try_remove(&key).unwrap(), model.remove(&key));
            }
            TreeOperation::Get { key } if usable(&key) => {
                assert_eq!(tree.try_get_value(&key).unwrap(), model.get(&key).copied());
            }
            TreeOperation::NextValue { key } if usable(&key) => {
                assert_eq!(tree.try_get_next_value(&key).unwrap(), model.get(&key).copied());
            }
            TreeOperation::ResetIteration => tree.initialize_for_iteration(),
            TreeOperation::Commit => tree.prepare_for_commit().unwrap(),
            _ => {}
        }
    }

    tree.verify().unwrap();
    assert_eq!(tree.number_of_entries(), model.len() as u64);
});
