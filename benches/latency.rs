use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use msqueue_rs::{ConcurrentQueue, MsQueue, RetryStrategy};
use std::thread;

// Number of ping-pong operations per benchmark
const PING_PONGS: usize = 100_000;

fn ping_pong(retry: RetryStrategy) {
    let q1 = MsQueue::with_retry(retry);
    let q2 = MsQueue::with_retry(retry);
    let (q1, q2) = (&q1, &q2);

    thread::scope(|s| {
        // Ping thread
        s.spawn(move || {
            let (out, back) = (q1.register(), q2.register());
            for i in 0..PING_PONGS {
                out.push(black_box(i as u32));
                black_box(back.pop_wait(retry));
            }
        });

        // Pong thread
        s.spawn(move || {
            let (input, reply) = (q1.register(), q2.register());
            for _ in 0..PING_PONGS {
                let val = input.pop_wait(retry);
                reply.push(black_box(val));
            }
        });
    });
}

fn bench_latency(c: &mut Criterion) {
    // Ping and pong must run on separate CPUs
    if num_cpus::get() < 2 {
        return;
    }

    let mut group = c.benchmark_group("latency");
    group.sample_size(10);

    group.bench_function(BenchmarkId::new("MsQueue/spin", "ping-pong"), |b| {
        b.iter(|| ping_pong(RetryStrategy::Spin))
    });

    group.bench_function(BenchmarkId::new("MsQueue/backoff", "ping-pong"), |b| {
        b.iter(|| ping_pong(RetryStrategy::Backoff))
    });

    group.finish();
}

criterion_group!(benches, bench_latency);
criterion_main!(benches);
