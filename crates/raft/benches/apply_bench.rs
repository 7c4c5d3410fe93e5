//! State machine apply and snapshot benchmarks.
//!
//! Runs against an on-disk store with relaxed durability so the numbers
//! reflect tree and transaction work rather than fsync latency.

#![allow(clippy::expect_used, missing_docs)]

use std::{hint::black_box, sync::Arc};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tempfile::TempDir;
use vellum_raft::{Command, CommitmentReceiver, ReplicatedStateMachine};
use vellum_types::{
    NoopMetrics, event_digest,
    config::{Durability, NotifyPolicy, StateMachineConfig},
};

fn open(dir: &TempDir) -> (ReplicatedStateMachine, CommitmentReceiver) {
    let config = StateMachineConfig::builder()
        .durability(Durability::Relaxed)
        .notify_policy(NotifyPolicy::DropNewest)
        .build()
        .expect("config");
    let path = dir.path().join("bench.redb");
    ReplicatedStateMachine::open_path(path, &config, Arc::new(NoopMetrics)).expect("open")
}

fn digest(i: u64) -> [u8; 32] {
    event_digest(&i.to_be_bytes())
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("fsm/apply");

    for batch in [1u64, 16, 256] {
        let dir = TempDir::new().expect("tempdir");
        let (fsm, _rx) = open(&dir);
        let mut index = 0u64;
        let mut next_event = 0u64;

        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::new("bulk", batch), &batch, |b, &batch| {
            b.iter(|| {
                index += 1;
                let digests = (next_event..next_event + batch).map(digest).collect();
                next_event += batch;
                let bytes = Command::AddEventsBulk { digests }.encode().expect("encode");
                black_box(fsm.apply(index, 1, &bytes).expect("apply"));
            });
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("fsm/snapshot");
    let dir = TempDir::new().expect("tempdir");
    let (fsm, _rx) = open(&dir);
    let digests: Vec<_> = (0..10_000).map(digest).collect();
    let bytes = Command::AddEventsBulk { digests }.encode().expect("encode");
    fsm.apply(1, 1, &bytes).expect("apply");

    group.bench_function("persist_10k", |b| {
        b.iter(|| {
            let snapshot = fsm.snapshot().expect("snapshot");
            black_box(snapshot.persist(Vec::new()).expect("persist"));
        });
    });

    let snapshot = fsm.snapshot().expect("snapshot");
    let (image, _) = snapshot.persist(Vec::new()).expect("persist");
    let target_dir = TempDir::new().expect("tempdir");
    let (target, _target_rx) = open(&target_dir);
    group.bench_function("restore_10k", |b| {
        b.iter(|| black_box(target.restore(image.as_slice()).expect("restore")));
    });
    group.finish();
}

criterion_group!(benches, bench_apply, bench_snapshot);
criterion_main!(benches);
