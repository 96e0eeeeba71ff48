//! Benchmarks for the scheduling queue and event loop posting
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hiview_engine::event_loop::{PriorityEventQueue, Scheduled};
use hiview_engine::{Audit, Event, EventLoop, MemoryAuditSink};
use std::sync::Arc;

#[derive(Clone, Copy)]
struct Entry {
    target: u64,
    seq: u64,
}

impl Scheduled for Entry {
    fn target_time(&self) -> u64 {
        self.target
    }

    fn sequence(&self) -> u64 {
        self.seq
    }
}

// Cheap deterministic scatter of targets
fn target_for(i: u64) -> u64 {
    i.wrapping_mul(0x9E37_79B9_7F4A_7C15) % 1_000_000
}

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("fill_then_drain", size), size, |b, &size| {
            b.iter(|| {
                let mut queue = PriorityEventQueue::new();
                for i in 0..size as u64 {
                    queue.push(Entry {
                        target: target_for(i),
                        seq: i + 1,
                    });
                }
                while let Some(entry) = queue.pop() {
                    black_box(entry.seq);
                }
            });
        });
    }

    group.finish();
}

fn bench_queue_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_remove");

    for size in [100usize, 1_000, 10_000].iter() {
        let mut template = PriorityEventQueue::new();
        for i in 0..*size as u64 {
            template.push(Entry {
                target: target_for(i),
                seq: i + 1,
            });
        }
        let entries = template.drain();

        group.bench_with_input(BenchmarkId::new("remove_middle", size), &entries, |b, entries| {
            b.iter_batched(
                || {
                    let mut queue = PriorityEventQueue::new();
                    for entry in entries {
                        queue.push(*entry);
                    }
                    queue
                },
                |mut queue| black_box(queue.remove(entries.len() as u64 / 2)),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_loop_posting(c: &mut Criterion) {
    let mut group = c.benchmark_group("loop_posting");

    let lp = Arc::new(EventLoop::new("bench"));
    lp.start_loop(true);
    group.bench_function("add_event_plain_task", |b| {
        b.iter(|| black_box(lp.add_event(None, None, Some(Box::new(|| {})))));
    });
    lp.stop_loop();

    let sink = Arc::new(MemoryAuditSink::new(1024));
    let audited = Arc::new(EventLoop::with_audit("bench-audit", Audit::new(sink)));
    audited.start_loop(true);
    let event = Event::builder("BENCH").sender("bench").build();
    group.bench_function("add_event_audited", |b| {
        b.iter(|| {
            black_box(audited.add_event(None, Some(Arc::clone(&event)), Some(Box::new(|| {}))))
        });
    });
    audited.stop_loop();

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_queue_remove,
    bench_loop_posting
);
criterion_main!(benches);
