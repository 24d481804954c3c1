//! Dictionary retraining, page recompression on write and merges between
//! pages encoded with different dictionaries.

use std::collections::BTreeMap;

use compact_tree::{CompactTree, DictionaryId, DictionaryRegistry, MemoryPageStore, PageFlags, TreeConfig};

fn key(i: u32) -> Vec<u8> {
    format!("key{:08}", i).into_bytes()
}

fn leaves<S: compact_tree::PageStore>(tree: &CompactTree<'_, S>) -> Vec<u32> {
    tree.all_pages()
        .unwrap()
        .into_iter()
        .filter(|&p| tree.page_summary(p).unwrap().flags == PageFlags::Leaf)
        .collect()
}

#[test]
fn full_page_switches_to_adopted_dictionary() {
    let mut store = MemoryPageStore::new();
    let registry = DictionaryRegistry::new();
    let config = TreeConfig::default().with_train_threshold(1_000);
    let mut tree = CompactTree::create(&mut store, &registry, config).unwrap();
    for i in 0..3_000 {
        tree.add(&key(i), i64::from(i)).unwrap();
    }
    tree.prepare_for_commit().unwrap();
    let adopted = tree.state().tree_dictionary_id;
    assert_ne!(adopted, DictionaryId::IDENTITY);

    // Existing pages keep their dictionary until written.
    for page in leaves(&tree) {
        assert_eq!(tree.page_summary(page).unwrap().dictionary_id, DictionaryId::IDENTITY);
    }

    tree.add(b"key00001500x", 42).unwrap();
    let upgraded: Vec<_> = leaves(&tree)
        .into_iter()
        .filter(|&p| tree.page_summary(p).unwrap().dictionary_id == adopted)
        .collect();
    assert_eq!(upgraded.len(), 1);
    assert_eq!(tree.statistics().recompressions, 1);
    assert_eq!(tree.try_get_value(b"key00001500x").unwrap(), Some(42));
    assert_eq!(tree.try_get_value(&key(1500)).unwrap(), Some(1500));
    tree.verify().unwrap();
}

#[test]
fn merge_reencodes_entries_from_other_dictionary() {
    let mut store = MemoryPageStore::new();
    let registry = DictionaryRegistry::new();
    let config = TreeConfig::default().with_train_threshold(1_000);
    let mut tree = CompactTree::create(&mut store, &registry, config).unwrap();
    let mut model = BTreeMap::new();
    for i in 0..3_000 {
        tree.add(&key(i), i64::from(i)).unwrap();
        model.insert(key(i), i64::from(i));
    }
    tree.prepare_for_commit().unwrap();
    let adopted = tree.state().tree_dictionary_id;
    assert_ne!(adopted, DictionaryId::IDENTITY);

    tree.add(b"key00001500x", 42).unwrap();
    model.insert(b"key00001500x".to_vec(), 42);

    let leaf_pages = leaves(&tree);
    let position = leaf_pages
        .iter()
        .position(|&p| tree.page_summary(p).unwrap().dictionary_id == adopted)
        .unwrap();
    assert!(position > 0 && position + 1 < leaf_pages.len(), "upgraded page must be a middle child");
    let upgraded = leaf_pages[position];
    let sibling = leaf_pages[position + 1];
    assert_eq!(tree.page_summary(sibling).unwrap().dictionary_id, DictionaryId::IDENTITY);
    let sibling_first = tree.all_entries_in(sibling).unwrap()[0].0.clone();

    let doomed: Vec<_> = tree
        .all_entries_in(upgraded)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    for k in &doomed[..doomed.len() - 1] {
        assert_eq!(tree.try_remove(k).unwrap(), model.remove(k));
        if tree.statistics().page_merges > 0 {
            break;
        }
    }
    assert!(tree.statistics().page_merges > 0);

    let moved = tree.all_entries_in(upgraded).unwrap();
    assert!(moved.iter().any(|(k, _)| *k == sibling_first));
    assert_eq!(tree.page_summary(upgraded).unwrap().dictionary_id, adopted);

    tree.verify().unwrap();
    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(tree.all_entries().unwrap(), expected);
}

#[test]
fn trained_dictionary_is_not_adopted_when_worse() {
    let mut store = MemoryPageStore::new();
    let registry = DictionaryRegistry::new();
    let config = TreeConfig::default().with_train_threshold(200);
    let mut tree = CompactTree::create(&mut store, &registry, config).unwrap();

    // Every byte value equally likely: no alphabet beats raw bytes.
    for i in 0..1_000u32 {
        let k: Vec<u8> = (0..8).map(|j| (i.wrapping_mul(2_654_435_761).rotate_left(j * 4) >> 3) as u8).collect();
        tree.add(&k, i64::from(i)).unwrap();
    }
    tree.prepare_for_commit().unwrap();

    assert_eq!(tree.state().tree_dictionary_id, DictionaryId::IDENTITY);
    assert_eq!(tree.state().next_train_at, 2 * tree.number_of_entries());
}
