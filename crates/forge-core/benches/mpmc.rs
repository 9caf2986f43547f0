//! Throughput of the bounded MPMC queue under single- and multi-threaded
//! producer/consumer load.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use forge_core::mpmc::MpmcQueue;
use std::sync::Arc;
use std::thread;

fn single_thread_push_pop(c: &mut Criterion) {
    c.bench_function("mpmc_single_thread_push_pop", |b| {
        let queue: MpmcQueue<u64> = MpmcQueue::with_capacity(1024);
        b.iter(|| {
            queue.push(black_box(1));
            black_box(queue.pop());
        });
    });
}

fn multi_producer_multi_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc_multi_producer_multi_consumer");
    for &pairs in &[1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                let queue: Arc<MpmcQueue<u64>> = Arc::new(MpmcQueue::with_capacity(4096));
                let per_thread = 50_000u64;
                thread::scope(|scope| {
                    for _ in 0..pairs {
                        let queue = Arc::clone(&queue);
                        scope.spawn(move || {
                            for i in 0..per_thread {
                                while !queue.try_push(i) {
                                    std::hint::spin_loop();
                                }
                            }
                        });
                    }
                    for _ in 0..pairs {
                        let queue = Arc::clone(&queue);
                        scope.spawn(move || {
                            let mut received = 0u64;
                            while received < per_thread {
                                if queue.pop().is_some() {
                                    received += 1;
                                }
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, single_thread_push_pop, multi_producer_multi_consumer);
criterion_main!(benches);
