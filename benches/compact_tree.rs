//! Compact tree benchmarks
//!
//! Measures the operations that dominate index maintenance: appends,
//! random inserts, point lookups, ascending probes and deletes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box as hint_black_box;

use compact_tree::{CompactTree, DictionaryRegistry, MemoryPageStore, TreeConfig};

fn bench_config() -> TreeConfig {
    TreeConfig::default().with_verify_pages(false)
}

fn shuffled(count: usize) -> Vec<usize> {
    let mut v: Vec<usize> = (0..count).collect();
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    for i in (1..v.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        v.swap(i, j);
    }
    v
}

fn populated(count: usize, registry: &DictionaryRegistry) -> (MemoryPageStore, u32) {
    let mut store = MemoryPageStore::new();
    let header_page = {
        let mut tree = CompactTree::create(&mut store, registry, bench_config()).unwrap();
        for i in 0..count {
            tree.add(format!("key{:08}", i).as_bytes(), i as i64).unwrap();
        }
        tree.prepare_for_commit().unwrap();
        tree.header_page()
    };
    (store, header_page)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_tree_insert");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            let registry = DictionaryRegistry::new();
            b.iter_with_setup(MemoryPageStore::new, |mut store| {
                let mut tree = CompactTree::create(&mut store, &registry, bench_config()).unwrap();
                for i in 0..count {
                    tree.add(format!("key{:08}", i).as_bytes(), i as i64).unwrap();
                }
                hint_black_box(tree.number_of_entries())
            });
        });

        group.bench_with_input(BenchmarkId::new("random", count), count, |b, &count| {
            let registry = DictionaryRegistry::new();
            let keys = shuffled(count);
            b.iter_with_setup(MemoryPageStore::new, |mut store| {
                let mut tree = CompactTree::create(&mut store, &registry, bench_config()).unwrap();
                for &i in &keys {
                    tree.add(format!("key{:08}", i).as_bytes(), i as i64).unwrap();
                }
                hint_black_box(tree.number_of_entries())
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_tree_get");

    for count in [1_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("existing_key", count), count, |b, &count| {
            let registry = DictionaryRegistry::new();
            let (mut store, header_page) = populated(count, &registry);
            let mut tree = CompactTree::open(&mut store, &registry, header_page, bench_config()).unwrap();
            let key = format!("key{:08}", count / 2);
            b.iter(|| hint_black_box(tree.try_get_value(black_box(key.as_bytes())).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("nonexistent_key", count), count, |b, &count| {
            let registry = DictionaryRegistry::new();
            let (mut store, header_page) = populated(count, &registry);
            let mut tree = CompactTree::open(&mut store, &registry, header_page, bench_config()).unwrap();
            let key = b"nonexistent_key_that_does_not_exist";
            b.iter(|| hint_black_box(tree.try_get_value(black_box(key)).unwrap()));
        });
    }

    group.finish();
}

fn bench_ascending_probes(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_tree_next_value");

    for count in [10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        let registry = DictionaryRegistry::new();
        let (mut store, header_page) = populated(*count, &registry);
        let keys: Vec<_> = (0..*count).map(|i| format!("key{:08}", i)).collect();

        group.bench_with_input(BenchmarkId::new("try_get_next_value", count), count, |b, _| {
            let mut tree = CompactTree::open(&mut store, &registry, header_page, bench_config()).unwrap();
            b.iter(|| {
                tree.initialize_for_iteration();
                let mut found = 0;
                for key in &keys {
                    found += tree.try_get_next_value(key.as_bytes()).unwrap().is_some() as usize;
                }
                found
            });
        });
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_tree_delete");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("random", count), count, |b, &count| {
            let registry = DictionaryRegistry::new();
            let keys = shuffled(count);
            b.iter_with_setup(
                || populated(count, &registry),
                |(mut store, header_page)| {
                    let mut tree = CompactTree::open(&mut store, &registry, header_page, bench_config()).unwrap();
                    for &i in &keys {
                        tree.try_remove(format!("key{:08}", i).as_bytes()).unwrap();
                    }
                    hint_black_box(tree.number_of_entries())
                },
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_get,
    bench_ascending_probes,
    bench_delete
);
criterion_main!(benches);
