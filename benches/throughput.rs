use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use msqueue_rs::{ConcurrentQueue, MsQueue, RetryStrategy};
use std::sync::Barrier;
use std::thread;

// Number of operations per benchmark
const OPS_PER_BENCH: usize = 1_000_000;

/// Moves `OPS_PER_BENCH` items from `threads` producers to `threads` consumers
fn transfer(threads: usize, retry: RetryStrategy) {
    let queue = MsQueue::with_retry(retry);
    let barrier = Barrier::new(threads * 2);
    let (q, b) = (&queue, &barrier);
    let per_thread = OPS_PER_BENCH / threads;

    thread::scope(|s| {
        // Producers
        for _ in 0..threads {
            s.spawn(move || {
                let handle = q.register();
                b.wait();
                for i in 0..per_thread {
                    handle.push(black_box(i as u64));
                }
            });
        }

        // Consumers
        for _ in 0..threads {
            s.spawn(move || {
                let handle = q.register();
                b.wait();
                for _ in 0..per_thread {
                    black_box(handle.pop_wait(retry));
                }
            });
        }
    });
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(OPS_PER_BENCH as u64));
    group.sample_size(10);

    for threads in [1, 2, 4].iter() {
        // Skip configurations that would require more than available CPUs
        if *threads * 2 > num_cpus::get() {
            continue;
        }

        group.bench_with_input(BenchmarkId::new("MsQueue/spin", threads), threads, |b, &threads| {
            b.iter(|| transfer(threads, RetryStrategy::Spin))
        });

        group.bench_with_input(
            BenchmarkId::new("MsQueue/backoff", threads),
            threads,
            |b, &threads| b.iter(|| transfer(threads, RetryStrategy::Backoff)),
        );
    }

    group.finish();
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");

    group.bench_function("push_pop/handle", |b| {
        let queue = MsQueue::new();
        let handle = queue.register();
        b.iter(|| {
            handle.push(black_box(1u64));
            black_box(handle.pop())
        })
    });

    group.bench_function("push_pop/transient", |b| {
        let queue = MsQueue::new();
        b.iter(|| {
            queue.push(black_box(1u64));
            black_box(queue.pop())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_throughput, bench_single_thread);
criterion_main!(benches);
