//! Performance benchmarks for resource rebuilds.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use live_resources::{
    CleanupManager, Filter, MemorySource, RelationDef, RelationSettings, Shape, SyncClient,
    SyncConfig, Target, ViewOptions,
};
use serde_json::json;
use std::sync::Arc;

fn populated_client(knights: usize) -> (SyncClient, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new());
    source.insert("kings", "arthur", json!({"name": "Arthur"}));
    for i in 0..knights {
        source.insert(
            "knights",
            &format!("{:05}", i),
            json!({"name": format!("Knight {}", i), "kingId": "arthur", "gold": i}),
        );
    }

    let relations = RelationSettings::new().with(
        "knights",
        "king",
        RelationDef::has_one("kings", "kingId"),
    );
    let client = SyncClient::new(source.clone(), SyncConfig::default().with_relations(relations));
    (client, source)
}

/// Benchmark a pushed update to one record of a live collection.
/// Every other resource is carried over.
fn bench_rebuild_on_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_on_update");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("collection_size", size), &size, |b, &size| {
            let (client, source) = populated_client(size);
            let view = client.view(
                Shape::Many,
                Some(Target::many(Filter::all("knights"))),
                &CleanupManager::new(),
                ViewOptions::default(),
            );
            view.value().unwrap();

            let mut gold = 0u64;
            b.iter(|| {
                gold += 1;
                source.update("knights", "00000", json!({ "gold": gold }));
                black_box(view.peek());
            });
        });
    }

    group.finish();
}

/// Benchmark rebuilds when every resource holds a live relation view.
fn bench_rebuild_with_relations(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_with_relations");

    for size in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("collection_size", size), &size, |b, &size| {
            let (client, source) = populated_client(size);
            let view = client.view(
                Shape::Many,
                Some(Target::many(Filter::all("knights"))),
                &CleanupManager::new(),
                ViewOptions::default(),
            );
            for resource in view.value().unwrap().resources() {
                resource.relation("king").unwrap().value().unwrap();
            }

            let mut gold = 0u64;
            b.iter(|| {
                gold += 1;
                source.update("knights", "00000", json!({ "gold": gold }));
                black_box(view.peek());
            });
        });
    }

    group.finish();
}

/// Benchmark creating and tearing down a view tree.
fn bench_view_lifecycle(c: &mut Criterion) {
    let (client, _source) = populated_client(100);

    c.bench_function("view_lifecycle_100", |b| {
        b.iter(|| {
            let owner = CleanupManager::new();
            let view = client.view(
                Shape::Many,
                Some(Target::many(Filter::all("knights"))),
                &owner,
                ViewOptions::default(),
            );
            black_box(view.value().unwrap());
            owner.dispose().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_rebuild_on_update,
    bench_rebuild_with_relations,
    bench_view_lifecycle,
);
criterion_main!(benches);
