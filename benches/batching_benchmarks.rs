use bytes::Bytes;
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use rask_remote_sink::buffer::{BatchList, organize_into_batches};
use rask_remote_sink::domain::{Transaction, TransactionList};

const STRIVE_SIZE: usize = 1024 * 1024;

fn make_transactions(count: usize) -> (TransactionList, usize) {
    // Mostly small records with the occasional oversized dump
    let small = Bytes::from(vec![b'x'; 2 * 1024]);
    let large = Bytes::from(vec![b'y'; 2 * STRIVE_SIZE]);
    let mut total = 0;
    let list = (0..count)
        .map(|i| {
            let body = if i % 250 == 0 { large.clone() } else { small.clone() };
            total += body.len();
            Transaction::new(format!("key-{}", i % 8), body)
        })
        .collect();
    (list, total)
}

fn benchmark_organize_into_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("batching");

    for count in [100, 1_000, 10_000] {
        let (_, total) = make_transactions(count);
        group.throughput(Throughput::Bytes(total as u64));
        group.bench_function(format!("organize_{count}"), |b| {
            b.iter_batched(
                || make_transactions(count).0,
                |transactions| {
                    let mut batches = BatchList::with_capacity(16);
                    organize_into_batches(
                        std::hint::black_box(transactions),
                        STRIVE_SIZE,
                        &mut batches,
                    );
                    batches
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_organize_into_batches);
criterion_main!(benches);
