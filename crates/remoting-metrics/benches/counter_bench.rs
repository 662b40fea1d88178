// Criterion benchmarks for remoting-metrics
//
// Run benchmarks with:
//   cargo bench -p remoting-metrics

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remoting_metrics::{summary, Counter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn bench_start_stop(c: &mut Criterion) {
    let mut group = c.benchmark_group("start_stop");

    let counter = Counter::new("Invoke");

    group.bench_function("single_call", |b| {
        b.iter(|| {
            let started = counter.start_count();
            black_box(counter.stop_count(started));
        });
    });

    group.finish();
}

fn bench_contended_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_increment");

    group.bench_function("four_threads", |b| {
        b.iter(|| {
            let counter = Arc::new(Counter::new("Send"));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    thread::spawn(move || {
                        for _ in 0..250 {
                            counter.increment(1, black_box(Duration::from_micros(3)));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            black_box(counter.count())
        });
    });

    group.finish();
}

fn bench_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("summary");

    let counters: Vec<Counter> = ["Invoke", "Send", "Receive"]
        .iter()
        .map(|name| {
            let counter = Counter::new(*name);
            counter.increment(100, Duration::from_millis(5));
            counter
        })
        .collect();

    group.bench_function("three_counters", |b| {
        b.iter(|| {
            let snapshots: Vec<_> = counters.iter().map(|c| c.snapshot()).collect();
            black_box(summary(&snapshots))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_start_stop, bench_contended_increment, bench_summary);
criterion_main!(benches);
