//! Performance benchmarks for fieldsync-engine

use fieldsync_engine::{
    conflict, replay_order, Backoff, OperationType, Payload, PendingOperation, Priority,
    RemoteOrder, RemoteSnapshot, ReplayPlan,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn make_queue(size: u64) -> Vec<PendingOperation> {
    (0..size)
        .map(|i| {
            let priority = match i % 3 {
                0 => Priority::High,
                1 => Priority::Normal,
                _ => Priority::Low,
            };
            PendingOperation::new(
                format!("op_{i}"),
                OperationType::OrderUpdate,
                json!({"orderId": format!("O{}", i % 50), "capturedAt": i, "changes": {"qty": i}}),
                size - i,
            )
            .with_priority(priority)
        })
        .collect()
}

fn bench_replay_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_order");

    for size in [100u64, 1_000, 10_000] {
        let queue = make_queue(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &queue, |b, queue| {
            b.iter(|| replay_order(black_box(queue.clone())))
        });
    }

    group.finish();
}

fn bench_plan_drain(c: &mut Criterion) {
    let backoff = Backoff::default();
    let queue = make_queue(1_000);

    c.bench_function("plan_drain_1000", |b| {
        b.iter(|| {
            let mut plan = ReplayPlan::new(black_box(queue.clone()));
            let mut steps = 0;
            while plan.next_step(black_box(10_000), &backoff).is_some() {
                steps += 1;
            }
            steps
        })
    });
}

fn bench_conflict_check(c: &mut Criterion) {
    let payload = Payload::decode(
        OperationType::OrderUpdate,
        &json!({"orderId": "O1", "capturedAt": 100, "changes": {"qty": 2}}),
    )
    .unwrap();
    let remote = RemoteSnapshot::Order(RemoteOrder {
        order_id: "O1".into(),
        updated_at: 50,
    });

    c.bench_function("evaluate_order_update", |b| {
        b.iter(|| conflict::evaluate(black_box(&payload), black_box(&remote)))
    });

    let raw = json!({"orderId": "O1", "capturedAt": 100, "changes": {"qty": 2}});
    c.bench_function("decode_order_update", |b| {
        b.iter(|| Payload::decode(OperationType::OrderUpdate, black_box(&raw)))
    });
}

criterion_group!(
    benches,
    bench_replay_order,
    bench_plan_drain,
    bench_conflict_check
);
criterion_main!(benches);
