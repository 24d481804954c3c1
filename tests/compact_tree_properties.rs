//! Model-based tests: random operation sequences checked against a
//! `BTreeMap`.

use std::collections::BTreeMap;

use compact_tree::{CompactTree, DictionaryRegistry, MemoryPageStore, PageStore, TreeConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(Vec<u8>, i64),
    Remove(Vec<u8>),
    Get(Vec<u8>),
    Commit,
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        4 => "[a-d]{1,12}".prop_map(String::into_bytes),
        2 => prop::collection::vec(any::<u8>(), 1..24),
        1 => (0u32..400).prop_map(|i| format!("key{:08}", i).into_bytes()),
        1 => (0u16..64).prop_map(|i| {
            let mut k = vec![b'w'; 600];
            k.extend_from_slice(&i.to_be_bytes());
            k
        }),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        50 => (key_strategy(), 0i64..=i64::MAX).prop_map(|(k, v)| Op::Add(k, v)),
        30 => key_strategy().prop_map(Op::Remove),
        19 => key_strategy().prop_map(Op::Get),
        1 => Just(Op::Commit),
    ];
    prop::collection::vec(op, 0..=1500)
}

fn config() -> TreeConfig {
    TreeConfig::default()
        .with_train_threshold(64)
        .with_verify_pages(true)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_matches_btreemap(ops in ops_strategy()) {
        let mut store = MemoryPageStore::new();
        let registry = DictionaryRegistry::new();
        let mut tree = CompactTree::create(&mut store, &registry, config()).unwrap();
        let mut model: BTreeMap<Vec<u8>, i64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Add(k, v) => {
                    tree.add(&k, v).unwrap();
                    model.insert(k, v);
                }
                Op::Remove(k) => {
                    prop_assert_eq!(tree.try_remove(&k).unwrap(), model.remove(&k));
                }
                Op::Get(k) => {
                    prop_assert_eq!(tree.try_get_value(&k).unwrap(), model.get(&k).copied());
                }
                Op::Commit => tree.prepare_for_commit().unwrap(),
            }
            prop_assert_eq!(tree.number_of_entries(), model.len() as u64);
        }

        tree.verify().unwrap();
        let entries = tree.all_entries().unwrap();
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn prop_insert_remove_symmetry(seed in any::<u64>(), count in 1usize..3000) {
        let mut store = MemoryPageStore::new();
        let registry = DictionaryRegistry::new();
        {
            let mut tree = CompactTree::create(&mut store, &registry, config()).unwrap();
            let mut keys: Vec<u64> = (0..count as u64)
                .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seed)
                .collect();
            for &k in &keys {
                tree.add(format!("{:020}", k).as_bytes(), (k >> 1) as i64).unwrap();
            }
            tree.prepare_for_commit().unwrap();

            keys.sort_unstable_by_key(|k| k.rotate_left(17) ^ seed);
            for &k in &keys {
                prop_assert_eq!(
                    tree.try_remove(format!("{:020}", k).as_bytes()).unwrap(),
                    Some((k >> 1) as i64)
                );
            }

            prop_assert_eq!(tree.number_of_entries(), 0);
            prop_assert_eq!(tree.state().leaf_pages, 1);
            prop_assert_eq!(tree.state().branch_pages, 0);
            tree.verify().unwrap();
        }
        prop_assert_eq!(store.page_count(), 2);
    }

    #[test]
    fn prop_next_value_matches_lookup(
        present in prop::collection::btree_set(0u32..5000, 0..800),
        probes in prop::collection::vec(0u32..5000, 1..400),
    ) {
        let mut store = MemoryPageStore::new();
        let registry = DictionaryRegistry::new();
        let mut tree = CompactTree::create(&mut store, &registry, config()).unwrap();
        for &i in &present {
            tree.add(format!("p{:06}", i).as_bytes(), i64::from(i)).unwrap();
        }

        let mut sorted = probes.clone();
        sorted.sort_unstable();
        tree.initialize_for_iteration();
        for i in sorted.iter().chain(probes.iter()) {
            let expected = present.contains(i).then_some(i64::from(*i));
            prop_assert_eq!(tree.try_get_next_value(format!("p{:06}", i).as_bytes()).unwrap(), expected);
        }
    }
}
