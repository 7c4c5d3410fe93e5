//! Snapshot and restore between state machines on separate stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::BTreeMap, sync::Arc};

use vellum_raft::{
    ApplyOutcome, Command, CommitmentReceiver, FsmError, FsmState, ReplicatedStateMachine,
    SnapshotError, SnapshotImage, SnapshotWriter,
};
use vellum_test_utils::TestDir;
use vellum_types::{Hash, NoopMetrics, config::StateMachineConfig, encode, event_digest};

fn open(dir: &TestDir) -> (ReplicatedStateMachine, CommitmentReceiver) {
    vellum_test_utils::init_tracing();
    ReplicatedStateMachine::open_path(
        dir.join("fsm.redb"),
        &StateMachineConfig::default(),
        Arc::new(NoopMetrics),
    )
    .expect("open state machine")
}

fn event(i: u64) -> Hash {
    event_digest(format!("e{i}").as_bytes())
}

fn add(digest: Hash) -> Vec<u8> {
    Command::AddEvent { digest }.encode().unwrap()
}

/// State machine holding events e0..e9 and one node's metadata.
fn populated(dir: &TestDir) -> (ReplicatedStateMachine, CommitmentReceiver) {
    let (fsm, rx) = open(dir);
    for i in 0..10 {
        fsm.apply(i + 1, 2, &add(event(i))).unwrap();
    }
    let kv = BTreeMap::from([("addr".to_string(), "10.1.0.7".to_string())]);
    let set = Command::MetadataSet { node_id: "node-a".into(), kv }.encode().unwrap();
    fsm.apply(11, 2, &set).unwrap();
    (fsm, rx)
}

fn persist(fsm: &ReplicatedStateMachine) -> Vec<u8> {
    let snapshot = fsm.snapshot().unwrap();
    let (bytes, written) = snapshot.persist(Vec::new()).unwrap();
    assert_eq!(bytes.len() as u64, written);
    bytes
}

#[test]
fn restore_reproduces_every_commitment() {
    let source_dir = TestDir::new();
    let (source, _rx) = populated(&source_dir);
    let bytes = persist(&source);

    let target_dir = TestDir::new();
    let (target, _target_rx) = open(&target_dir);
    let state = target.restore(bytes.as_slice()).unwrap();

    assert_eq!(state, FsmState { index: 11, term: 2, balloon_version: 10 });
    assert_eq!(target.state().unwrap(), source.state().unwrap());
    for version in 0..10 {
        assert_eq!(target.commitment(version).unwrap(), source.commitment(version).unwrap());
    }
    assert_eq!(target.metadata("node-a", "addr"), "10.1.0.7");

    let proof = target.query_membership(event(4), 9).unwrap();
    assert!(proof.verify());
}

/// Re-frames `image` with its header state replaced by `state`.
fn reframe(image: &SnapshotImage, state: FsmState) -> Vec<u8> {
    let mut writer = SnapshotWriter::new(Vec::new(), 3).unwrap();
    writer.write_header(&encode(&state).unwrap(), &encode(&image.metadata).unwrap()).unwrap();
    writer.write_table_count(image.tables.len() as u32).unwrap();
    for (table, entries) in &image.tables {
        writer.write_table_header(*table, entries.len() as u64).unwrap();
        for (key, value) in entries {
            writer.write_table_entry(key, value).unwrap();
        }
    }
    writer.finish().unwrap().0
}

#[test]
fn restore_recomputes_version_from_events() {
    let source_dir = TestDir::new();
    let (source, _rx) = open(&source_dir);
    for i in 0..10 {
        source.apply(i + 1, 1, &add(event(i))).unwrap();
    }
    let image = SnapshotImage::read_from(persist(&source).as_slice()).unwrap();
    let bytes = reframe(&image, FsmState { balloon_version: 99, ..image.state });

    let claimed = SnapshotImage::read_from(bytes.as_slice()).unwrap();
    assert_eq!(claimed.state.balloon_version, 99);
    assert_eq!(claimed.event_count(), 10);

    let target_dir = TestDir::new();
    let (target, _target_rx) = open(&target_dir);
    let state = target.restore(bytes.as_slice()).unwrap();
    assert_eq!(state, FsmState { index: 10, term: 1, balloon_version: 10 });
    assert_eq!(target.state().unwrap(), state);

    let outcome = target.apply(11, 1, &add(event(10))).unwrap();
    let ApplyOutcome::Added(commitments) = outcome else {
        unreachable!("add produced no commitments");
    };
    assert_eq!(commitments[0].version, 10);
    assert_eq!(target.state().unwrap().balloon_version, 11);

    source.apply(11, 1, &add(event(10))).unwrap();
    assert_eq!(target.commitment(10).unwrap(), source.commitment(10).unwrap());
}

#[test]
fn restored_machine_rejects_replayed_entries() {
    let source_dir = TestDir::new();
    let (source, _rx) = populated(&source_dir);
    let bytes = persist(&source);

    let target_dir = TestDir::new();
    let (target, mut target_rx) = open(&target_dir);
    target.restore(bytes.as_slice()).unwrap();

    assert!(target.apply(10, 2, &add(event(9))).unwrap_err().is_stale());
    target.apply(12, 2, &add(event(10))).unwrap();
    assert_eq!(target.state().unwrap().balloon_version, 11);
    assert_eq!(target_rx.try_recv().unwrap().version, 10);

    // Both replicas extend identically
    source.apply(12, 2, &add(event(10))).unwrap();
    assert_eq!(target.commitment(10).unwrap(), source.commitment(10).unwrap());
}

#[test]
fn restored_store_survives_reopen() {
    let source_dir = TestDir::new();
    let (source, _rx) = populated(&source_dir);
    let bytes = persist(&source);

    let target_dir = TestDir::new();
    {
        let (target, _rx) = open(&target_dir);
        target.restore(bytes.as_slice()).unwrap();
        target.close();
    }

    let (target, _rx) = open(&target_dir);
    assert_eq!(target.state().unwrap().balloon_version, 10);
    assert_eq!(target.commitment(9).unwrap(), source.commitment(9).unwrap());
    // Metadata lives in memory only
    assert_eq!(target.metadata("node-a", "addr"), "");
}

#[test]
fn restore_replaces_existing_state() {
    let source_dir = TestDir::new();
    let (source, _rx) = populated(&source_dir);
    let bytes = persist(&source);

    let target_dir = TestDir::new();
    let (target, _rx) = open(&target_dir);
    for i in 0..15 {
        target.apply(i + 1, 1, &add(event_digest(format!("other{i}").as_bytes()))).unwrap();
    }
    let kv = BTreeMap::from([("zone".to_string(), "b".to_string())]);
    let set = Command::MetadataSet { node_id: "node-z".into(), kv }.encode().unwrap();
    target.apply(16, 1, &set).unwrap();

    target.restore(bytes.as_slice()).unwrap();
    assert_eq!(target.state().unwrap().balloon_version, 10);
    assert!(target.commitment(12).is_err());
    assert_eq!(target.commitment(9).unwrap(), source.commitment(9).unwrap());
    assert_eq!(target.metadata("node-z", "zone"), "");
    assert!(matches!(
        target.query_membership(event_digest(b"other3"), 9),
        Err(FsmError::EventNotFound { .. })
    ));
}

#[test]
fn snapshot_is_a_point_in_time_view() {
    let dir = TestDir::new();
    let (fsm, _rx) = populated(&dir);
    let snapshot = fsm.snapshot().unwrap();

    fsm.apply(12, 2, &add(event(10))).unwrap();
    let (bytes, _) = snapshot.persist(Vec::new()).unwrap();

    let image = SnapshotImage::read_from(bytes.as_slice()).unwrap();
    assert_eq!(image.state.balloon_version, 10);
    assert_eq!(image.event_count(), 10);
}

#[test]
fn corrupt_stream_leaves_state_untouched() {
    let source_dir = TestDir::new();
    let (source, _rx) = populated(&source_dir);
    let mut bytes = persist(&source);
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;

    let target_dir = TestDir::new();
    let (target, _rx) = open(&target_dir);
    target.apply(1, 1, &add(event(0))).unwrap();

    let err = target.restore(bytes.as_slice()).unwrap_err();
    assert!(matches!(
        err,
        FsmError::Snapshot { source: SnapshotError::ChecksumMismatch { .. } }
    ));
    assert_eq!(target.state().unwrap(), FsmState { index: 1, term: 1, balloon_version: 1 });

    let fresh = persist(&source);
    assert!(target.restore(&fresh[..20]).is_err());
    assert_eq!(target.state().unwrap().balloon_version, 1);
}

#[test]
fn empty_machine_round_trips() {
    let source_dir = TestDir::new();
    let (source, _rx) = open(&source_dir);
    let bytes = persist(&source);

    let target_dir = TestDir::new();
    let (target, _rx) = open(&target_dir);
    assert_eq!(target.restore(bytes.as_slice()).unwrap(), FsmState::default());
    target.apply(1, 1, &add(event(0))).unwrap();
}
