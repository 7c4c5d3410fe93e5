//! End-to-end apply behavior of the replicated state machine on disk.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::BTreeMap, sync::Arc};

use vellum_raft::{
    ApplyError, ApplyOutcome, Command, CommitmentReceiver, FsmError, FsmState, InMemoryMetadata,
    MetadataRegistry, ReplicatedStateMachine,
};
use vellum_store::StorageEngine;
use vellum_test_utils::TestDir;
use vellum_types::{ErrorCode, Hash, NoopMetrics, config::StateMachineConfig, event_digest};

fn open(dir: &TestDir) -> (ReplicatedStateMachine, CommitmentReceiver) {
    vellum_test_utils::init_tracing();
    ReplicatedStateMachine::open_path(
        dir.join("fsm.redb"),
        &StateMachineConfig::default(),
        Arc::new(NoopMetrics),
    )
    .expect("open state machine")
}

fn hello(i: usize) -> Hash {
    event_digest(format!("Hello World{i}").as_bytes())
}

fn add(digest: Hash) -> Vec<u8> {
    Command::AddEvent { digest }.encode().unwrap()
}

fn bulk(digests: Vec<Hash>) -> Vec<u8> {
    Command::AddEventsBulk { digests }.encode().unwrap()
}

fn set(node_id: &str, pairs: &[(&str, &str)]) -> Vec<u8> {
    let kv = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Command::MetadataSet { node_id: node_id.to_string(), kv }.encode().unwrap()
}

fn added(outcome: ApplyOutcome) -> Vec<u64> {
    let ApplyOutcome::Added(commitments) = outcome else {
        unreachable!("expected an add");
    };
    commitments.iter().map(|c| c.version).collect()
}

#[test]
fn duplicate_delivery_is_rejected_once() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);

    fsm.apply(1, 1, &add(hello(1))).unwrap();

    let err = fsm.apply(1, 1, &add(hello(1))).unwrap_err();
    assert!(err.is_stale());
    assert_eq!(err.code(), ErrorCode::StateMachineStale);
    assert_eq!(fsm.state().unwrap(), FsmState { index: 1, term: 1, balloon_version: 1 });

    fsm.apply(2, 1, &add(hello(2))).unwrap();
    assert!(fsm.apply(1, 1, &add(hello(3))).unwrap_err().is_stale());
    assert_eq!(fsm.state().unwrap().balloon_version, 2);
}

#[test]
fn higher_term_resets_index_comparison() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);

    fsm.apply(5, 1, &add(hello(1))).unwrap();
    assert!(fsm.apply(6, 0, &add(hello(2))).unwrap_err().is_stale());

    fsm.apply(3, 2, &add(hello(2))).unwrap();
    assert_eq!(fsm.state().unwrap(), FsmState { index: 3, term: 2, balloon_version: 2 });
}

#[test]
fn version_tracks_number_of_adds() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);

    for i in 1..=20u64 {
        let versions = added(fsm.apply(i, 1, &add(hello(i as usize))).unwrap());
        assert_eq!(versions, vec![i - 1]);
    }
    assert_eq!(fsm.state().unwrap().balloon_version, 20);
}

#[test]
fn golden_commitment_through_apply() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    for i in 1..=5 {
        fsm.apply(i as u64, 1, &add(hello(i))).unwrap();
    }

    let commitment = fsm.commitment(4).unwrap();
    assert_eq!(
        hex::encode(commitment.digest),
        "377f2fb38a02913effc8ec6de5bf51bfe1ebe2e473ea4fb5060f94b7c11b676e"
    );
}

#[test]
fn bulk_add_produces_one_commitment_per_event() {
    let dir = TestDir::new();
    let (fsm, mut rx) = open(&dir);

    fsm.apply(1, 1, &add(hello(0))).unwrap();
    let versions = added(fsm.apply(2, 1, &bulk((1..=4).map(hello).collect())).unwrap());
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert_eq!(fsm.state().unwrap(), FsmState { index: 2, term: 1, balloon_version: 5 });

    // Bulk add and single adds produce the same tree
    let other_dir = TestDir::new();
    let (other, _other_rx) = open(&other_dir);
    for i in 0..5 {
        other.apply(i as u64 + 1, 1, &add(hello(i))).unwrap();
    }
    assert_eq!(fsm.commitment(4).unwrap(), other.commitment(4).unwrap());

    let published: Vec<u64> =
        std::iter::from_fn(|| rx.try_recv().ok()).map(|n| n.version).collect();
    assert_eq!(published, vec![0, 1, 2, 3, 4]);
}

#[test]
fn empty_bulk_only_advances_position() {
    let dir = TestDir::new();
    let (fsm, mut rx) = open(&dir);

    fsm.apply(1, 1, &add(hello(1))).unwrap();
    let versions = added(fsm.apply(2, 1, &bulk(vec![])).unwrap());
    assert!(versions.is_empty());
    assert_eq!(fsm.state().unwrap(), FsmState { index: 2, term: 1, balloon_version: 1 });

    rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn notifications_carry_digests_in_apply_order() {
    let dir = TestDir::new();
    let (fsm, mut rx) = open(&dir);

    for i in 1..=3 {
        let outcome = fsm.apply(i as u64, 1, &add(hello(i))).unwrap();
        let ApplyOutcome::Added(commitments) = outcome else {
            unreachable!("add produced no commitments");
        };
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.version, (i - 1) as u64);
        assert_eq!(notification.event_digest, hello(i));
        assert_eq!(notification.history_digest, commitments[0].digest);
        assert_ne!(notification.hyper_digest, [0u8; 32]);
    }
    assert!(rx.try_recv().is_err());
}

#[test]
fn dropped_receiver_does_not_block_apply() {
    let dir = TestDir::new();
    let (fsm, rx) = open(&dir);
    drop(rx);

    for i in 1..=3 {
        fsm.apply(i as u64, 1, &add(hello(i))).unwrap();
    }
    assert_eq!(fsm.state().unwrap().balloon_version, 3);
}

#[test]
fn malformed_command_changes_nothing() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    fsm.apply(1, 1, &add(hello(1))).unwrap();

    for bytes in [vec![], vec![9, 0, 0], vec![0, 1, 2]] {
        let err = fsm.apply(2, 1, &bytes).unwrap_err();
        assert!(matches!(err, ApplyError::Decode { index: 2, .. }), "{err}");
        assert!(!err.is_fatal());
    }
    assert_eq!(fsm.state().unwrap(), FsmState { index: 1, term: 1, balloon_version: 1 });
    fsm.apply(2, 1, &add(hello(2))).unwrap();
}

#[test]
fn metadata_merges_and_deletes() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    let handle = fsm.metadata_handle();

    assert_eq!(fsm.metadata("node-a", "addr"), "");

    let first = set("node-a", &[("addr", "10.0.0.1"), ("zone", "a")]);
    let outcome = fsm.apply(1, 1, &first).unwrap();
    assert_eq!(outcome, ApplyOutcome::MetadataUpdated);
    fsm.apply(2, 1, &set("node-a", &[("addr", "10.0.0.2")])).unwrap();

    assert_eq!(handle.get("node-a", "addr"), "10.0.0.2");
    assert_eq!(fsm.metadata("node-a", "zone"), "a");
    assert_eq!(fsm.metadata_for("node-a").len(), 2);

    let delete = Command::MetadataDelete { node_id: "node-a".into() }.encode().unwrap();
    fsm.apply(3, 1, &delete).unwrap();
    assert_eq!(handle.get("node-a", "addr"), "");
    assert_eq!(fsm.metadata_for("node-a"), BTreeMap::new());

    // Metadata advances the log position but never the tree
    assert_eq!(fsm.state().unwrap(), FsmState { index: 3, term: 1, balloon_version: 0 });
    assert!(fsm.apply(3, 1, &delete).unwrap_err().is_stale());
}

#[test]
fn supplied_registry_holds_metadata() {
    let dir = TestDir::new();
    let config = StateMachineConfig::default();
    let registry = Arc::new(InMemoryMetadata::new());
    let kv = BTreeMap::from([("addr".to_string(), "10.0.0.9".to_string())]);
    registry.set("node-a", kv);

    let engine =
        StorageEngine::open(dir.join("fsm.redb"), config.cache_size_bytes, config.durability)
            .unwrap();
    let (fsm, _rx) = ReplicatedStateMachine::open_with_metadata(
        engine,
        &config,
        Arc::new(NoopMetrics),
        registry.clone(),
    )
    .unwrap();

    assert_eq!(fsm.metadata("node-a", "addr"), "10.0.0.9");
    fsm.apply(1, 1, &set("node-b", &[("zone", "c")])).unwrap();
    assert_eq!(registry.get("node-b", "zone"), "c");

    let delete = Command::MetadataDelete { node_id: "node-a".into() }.encode().unwrap();
    fsm.apply(2, 1, &delete).unwrap();
    assert!(registry.node("node-a").is_empty());
}

#[test]
fn membership_and_consistency_queries() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    for i in 0..8 {
        fsm.apply(i as u64 + 1, 1, &add(hello(i))).unwrap();
    }

    let proof = fsm.query_membership(hello(3), 6).unwrap();
    assert_eq!(proof.index, 3);
    assert!(proof.verify());
    assert_eq!(proof.root, fsm.commitment(6).unwrap().digest);

    // Added after the requested version
    assert!(matches!(fsm.query_membership(hello(7), 5), Err(FsmError::Query { .. })));

    let unknown = event_digest(b"never added");
    let err = fsm.query_membership(unknown, 7).unwrap_err();
    assert!(matches!(err, FsmError::EventNotFound { .. }));
    assert_eq!(err.code(), ErrorCode::StorageNotFound);

    let proof = fsm.query_consistency(2, 7).unwrap();
    let start = fsm.commitment(2).unwrap();
    let end = fsm.commitment(7).unwrap();
    assert!(proof.verify(&start.digest, &end.digest));
    assert!(!proof.verify(&end.digest, &start.digest));
}

#[test]
fn duplicate_digest_keeps_first_version() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    fsm.apply(1, 1, &add(hello(1))).unwrap();
    fsm.apply(2, 1, &add(hello(2))).unwrap();
    fsm.apply(3, 1, &add(hello(1))).unwrap();

    assert_eq!(fsm.state().unwrap().balloon_version, 3);
    assert_eq!(fsm.query_membership(hello(1), 2).unwrap().index, 0);
}

#[test]
fn reopen_recovers_state_and_tree() {
    let dir = TestDir::new();
    let before = {
        let (fsm, _rx) = open(&dir);
        for i in 1..=6 {
            fsm.apply(i as u64, 3, &add(hello(i))).unwrap();
        }
        let commitment = fsm.commitment(5).unwrap();
        fsm.close();
        commitment
    };

    let (fsm, _rx) = open(&dir);
    assert_eq!(fsm.state().unwrap(), FsmState { index: 6, term: 3, balloon_version: 6 });
    assert_eq!(fsm.commitment(5).unwrap(), before);
    assert!(fsm.apply(6, 3, &add(hello(7))).unwrap_err().is_stale());
    assert_eq!(added(fsm.apply(7, 3, &add(hello(7))).unwrap()), vec![6]);
}

#[test]
fn close_is_terminal_and_idempotent() {
    let dir = TestDir::new();
    let (fsm, _rx) = open(&dir);
    fsm.apply(1, 1, &add(hello(1))).unwrap();

    fsm.close();
    fsm.close();
    assert!(fsm.is_closed());

    let err = fsm.apply(2, 1, &add(hello(2))).unwrap_err();
    assert!(matches!(err, ApplyError::Closed));
    assert!(matches!(fsm.state(), Err(FsmError::NotOpen)));
    assert!(matches!(fsm.snapshot(), Err(FsmError::NotOpen)));
    assert!(matches!(fsm.commitment(0), Err(FsmError::NotOpen)));
}
