use chrono::{Duration as ChronoDuration, Utc};
use collector_core::models::{ExpectedCoverageEntry, InventorySnapshot, SourceId};
use collector_core::orchestration::{GapDetector, TaskQueue};
use collector_core::resilience::{Admission, RateGovernor, SourceBudget};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn coverage(count: usize) -> Vec<ExpectedCoverageEntry> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            ExpectedCoverageEntry::new(
                format!("source-{}", i % 8),
                format!("day-{i}"),
                Duration::from_secs(3_600),
                now - ChronoDuration::days((i % 30) as i64),
            )
        })
        .collect()
}

fn benchmark_gap_detection(c: &mut Criterion) {
    let detector = GapDetector::with_critical_window(Duration::from_secs(7 * 24 * 3_600));
    let expected = coverage(10_000);
    let mut snapshot = InventorySnapshot::new(Utc::now());
    for entry in expected.iter().step_by(2) {
        snapshot.insert(entry.source_id.clone(), entry.scope.clone(), Utc::now());
    }

    c.bench_function("gap_detection_10k", |b| {
        b.iter(|| detector.detect(black_box(&snapshot), black_box(&expected)))
    });
}

fn benchmark_queue_push_pop(c: &mut Criterion) {
    let detector = GapDetector::with_critical_window(Duration::from_secs(7 * 24 * 3_600));
    let tasks = detector.detect(&InventorySnapshot::new(Utc::now()), &coverage(1_000));

    c.bench_function("queue_push_pop_1k", |b| {
        b.iter(|| {
            let queue = TaskQueue::new(2_000);
            queue.push_batch(tasks.iter().cloned());
            while let Some(task) = queue.pop() {
                black_box(task);
            }
        })
    });
}

fn benchmark_governor_acquire(c: &mut Criterion) {
    let source = SourceId::new("weather");
    let governor =
        RateGovernor::new([(source.clone(), SourceBudget::new(1e9, u32::MAX, 1))]).unwrap();

    c.bench_function("governor_acquire_release", |b| {
        b.iter(|| match governor.acquire(black_box(&source)).unwrap() {
            Admission::Granted(permit) => drop(permit),
            Admission::WouldBlock(reason) => panic!("unexpected block: {reason:?}"),
        })
    });
}

criterion_group!(
    benches,
    benchmark_gap_detection,
    benchmark_queue_push_pop,
    benchmark_governor_acquire
);
criterion_main!(benches);
