//! Throughput of the timer queue under churn: scheduling, firing, and
//! repeat-rescheduling one-shot and repeating timers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ise_core::timer::TimerQueue;
use std::time::{Duration, Instant};

fn bench_add_and_expire(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue_add_and_expire");
    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut queue = TimerQueue::new();
                let base = Instant::now();
                for i in 0..count {
                    queue.add_timer(base + Duration::from_micros(i as u64), Duration::ZERO, Box::new(|_| {}));
                }
                queue.process_expired(base + Duration::from_secs(1));
                black_box(queue.is_empty());
            });
        });
    }
    group.finish();
}

fn bench_repeating_timer_churn(c: &mut Criterion) {
    c.bench_function("timer_queue_repeating_churn_1000_ticks", |b| {
        b.iter(|| {
            let mut queue = TimerQueue::new();
            let base = Instant::now();
            queue.add_timer(base, Duration::from_micros(1), Box::new(|_| {}));
            let mut now = base;
            for _ in 0..1_000 {
                now += Duration::from_micros(1);
                queue.process_expired(now);
            }
            black_box(queue.next_expiration());
        });
    });
}

criterion_group!(benches, bench_add_and_expire, bench_repeating_timer_churn);
criterion_main!(benches);
