use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use towermap::{SkipList, VersionedSkipList};

const DATASET_SIZE: u64 = 10_000;

fn populated_list() -> SkipList<u64, u64> {
    let list = SkipList::new();
    for k in 0..DATASET_SIZE {
        list.insert(k, k * 2);
    }
    list
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(DATASET_SIZE));
    group.bench_function("sequential_10k", |b| {
        b.iter_batched_ref(
            SkipList::<u64, u64>::new,
            |list| {
                for k in 0..DATASET_SIZE {
                    black_box(list.insert(k, k * 2));
                }
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let list = populated_list();
    let mut rng = StdRng::seed_from_u64(17);
    let keys: Vec<u64> = (0..1_024).map(|_| rng.gen_range(0..DATASET_SIZE)).collect();

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("random_hits", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(list.get(key));
            }
        });
    });
    group.finish();
}

fn bench_range(c: &mut Criterion) {
    let list = populated_list();
    let mut group = c.benchmark_group("range");
    group.bench_function("window_of_100", |b| {
        b.iter(|| black_box(list.range(&4_000, &4_099)));
    });
    group.finish();
}

fn bench_mvcc_commit(c: &mut Criterion) {
    let list: VersionedSkipList<u64, u64> = VersionedSkipList::new();
    let txns = list.transaction_manager().clone();
    let mut next_key = 0u64;

    let mut group = c.benchmark_group("mvcc");
    group.bench_function("insert_commit_roundtrip", |b| {
        b.iter(|| {
            let txn = txns.begin();
            list.insert(next_key, next_key, &txn).unwrap();
            txns.commit(&txn).unwrap();
            next_key = next_key.wrapping_add(1);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_get,
    bench_range,
    bench_mvcc_commit
);
criterion_main!(benches);
