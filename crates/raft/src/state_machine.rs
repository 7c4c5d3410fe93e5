//! Replicated state machine over the history tree.
//!
//! The consensus layer delivers committed entries to [`ReplicatedStateMachine::apply`]
//! one at a time, in log order, and never overlaps an apply with a snapshot
//! or restore. Each tree mutation and the new applied state are written in
//! one redb transaction, so a crash leaves either both or neither.
//!
//! Key responsibilities:
//! - Reject entries that were already applied
//! - Add event digests to the history tree and the peer index
//! - Publish one commitment notification per added event
//! - Maintain per-node metadata
//! - Build and install snapshots, recomputing the tree size on restore

use std::{
    io::Read,
    path::Path,
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;
use redb::{ReadableTable, WriteTransaction};
use snafu::{OptionExt, ResultExt, ensure};
use vellum_state::{
    Commitment, HistoryTree, IncrementalProof, MembershipProof, MutationBatch, PeerIndex,
    StagedNodeStore, TableId, Tables, VersionIndex, encode_chain_meta, rebuild_chain,
    tables::{FSM_STATE_KEY, PEER_CHAIN_KEY, contiguous_event_count},
};
use vellum_store::StorageEngine;
use vellum_types::{Hash, MetricsSink, config::StateMachineConfig, decode, encode};

use crate::{
    command::Command,
    error::{
        ApplyError, ClosedSnafu, CodecSnafu, DecodeSnafu, DivergedSnafu, EventNotFoundSnafu,
        InconsistentSnafu, NotOpenSnafu, QuerySnafu, Result, SnapshotSnafu, StaleSnafu,
        StateRecordSnafu, StorageSnafu, StoreSnafu, TreeSnafu, UnavailableSnafu,
    },
    metadata::{InMemoryMetadata, MetadataHandle, MetadataRegistry},
    notify::{CommitmentNotification, CommitmentReceiver, CommitmentSender, commitment_channel},
    snapshot::{FsmSnapshot, SnapshotImage},
    state::FsmState,
};

/// What a successful apply did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Events were added; one commitment per event, in order.
    Added(Vec<Commitment>),
    /// Node metadata changed.
    MetadataUpdated,
}

/// Contract between the consensus layer and the application state.
pub trait StateMachine: Send + Sync {
    /// Point-in-time view produced by [`snapshot`](Self::snapshot).
    type Snapshot;

    /// Applies one committed log entry.
    fn apply(&self, index: u64, term: u64, command: &[u8]) -> Result<ApplyOutcome, ApplyError>;

    /// Captures the current state for later streaming.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Replaces the whole state with a streamed snapshot.
    fn restore(&self, reader: &mut dyn Read) -> Result<FsmState>;
}

struct Core {
    tree: HistoryTree<StagedNodeStore>,
    peer: VersionIndex,
    state: FsmState,
    /// Set after a fatal error; every later apply is refused.
    halted: Option<String>,
}

impl Core {
    fn engine(&self) -> &StorageEngine {
        self.tree.store().engine()
    }

    /// Drops staged writes and re-reads the tree size and peer chain.
    fn rollback(&mut self) -> Result<()> {
        self.tree.store_mut().discard_staged();
        self.tree.refresh_size().context(QuerySnafu)?;
        self.peer.discard_staged().context(StoreSnafu)?;
        Ok(())
    }
}

/// The replicated state machine.
///
/// All methods take `&self`. Applies are serialized by the consensus layer;
/// the internal lock only protects against readers and [`close`](Self::close).
pub struct ReplicatedStateMachine {
    core: Mutex<Option<Core>>,
    restore_lock: Mutex<()>,
    metadata: MetadataHandle,
    notifier: CommitmentSender,
    config: StateMachineConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ReplicatedStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("ReplicatedStateMachine")
            .field("open", &core.is_some())
            .field("state", &core.as_ref().map(|c| c.state))
            .finish_non_exhaustive()
    }
}

impl ReplicatedStateMachine {
    /// Opens the state machine over `engine`, recovering the applied state.
    ///
    /// A clean store starts at `(0, 0, 0)`. Returns the receiving end of
    /// the commitment channel alongside the state machine.
    ///
    /// # Errors
    ///
    /// Returns `FsmError::Inconsistent` if the persisted state and tree
    /// disagree, or a store error if they cannot be read.
    pub fn open(
        engine: StorageEngine,
        config: &StateMachineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<(Self, CommitmentReceiver)> {
        Self::open_with_metadata(engine, config, metrics, Arc::new(InMemoryMetadata::new()))
    }

    /// Like [`open`](Self::open), with metadata kept in `registry`.
    ///
    /// The registry is used as is: whatever it already holds is visible to
    /// readers until a metadata command or a restore changes it.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_with_metadata(
        engine: StorageEngine,
        config: &StateMachineConfig,
        metrics: Arc<dyn MetricsSink>,
        registry: Arc<dyn MetadataRegistry>,
    ) -> Result<(Self, CommitmentReceiver)> {
        engine.ensure_tables(&TableId::definitions()).context(StoreSnafu)?;

        let state = load_state(&engine)?;
        let store = StagedNodeStore::new(engine.clone());
        let tree = HistoryTree::with_size(store).context(QuerySnafu)?;
        let peer = VersionIndex::open(engine).context(StoreSnafu)?;

        ensure!(
            tree.size() == state.balloon_version,
            InconsistentSnafu { expected: state.balloon_version, found: tree.size() }
        );
        ensure!(
            peer.count() == tree.size(),
            InconsistentSnafu { expected: tree.size(), found: peer.count() }
        );

        tracing::info!(
            index = state.index,
            term = state.term,
            balloon_version = state.balloon_version,
            "Opened state machine"
        );
        metrics.set_applied_index(state.index);
        metrics.set_tree_size(tree.size());

        let (notifier, receiver) =
            commitment_channel(config.notify_capacity, config.notify_policy, Arc::clone(&metrics));
        let fsm = Self {
            core: Mutex::new(Some(Core { tree, peer, state, halted: None })),
            restore_lock: Mutex::new(()),
            metadata: MetadataHandle::new(registry),
            notifier,
            config: config.clone(),
            metrics,
        };
        Ok((fsm, receiver))
    }

    /// Opens or creates the store at `path` and opens the state machine on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or is inconsistent.
    pub fn open_path(
        path: impl AsRef<Path>,
        config: &StateMachineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<(Self, CommitmentReceiver)> {
        let engine = StorageEngine::open(path, config.cache_size_bytes, config.durability)
            .context(StoreSnafu)?;
        Self::open(engine, config, metrics)
    }

    /// Applies one committed log entry.
    ///
    /// # Errors
    ///
    /// - `ApplyError::Stale` if `(index, term)` was already applied
    /// - `ApplyError::Decode` if the bytes are not a command
    /// - `ApplyError::Diverged` if the tree no longer matches the applied
    ///   state; the state machine halts
    /// - `ApplyError::Unavailable` after a fatal error
    /// - a storage error if the transaction failed; nothing was applied
    #[tracing::instrument(skip(self, bytes))]
    pub fn apply(&self, index: u64, term: u64, bytes: &[u8]) -> Result<ApplyOutcome, ApplyError> {
        let start = Instant::now();
        let mut guard = self.core.lock();
        let core = guard.as_mut().context(ClosedSnafu)?;
        if let Some(reason) = &core.halted {
            return UnavailableSnafu { reason: reason.clone() }.fail();
        }

        let command = Command::decode(bytes).context(DecodeSnafu { index })?;
        if !core.state.accepts(index, term) {
            self.metrics.record_stale_command();
            tracing::debug!(
                applied_index = core.state.index,
                applied_term = core.state.term,
                "Skipping already applied entry"
            );
            return StaleSnafu {
                index,
                term,
                applied_index: core.state.index,
                applied_term: core.state.term,
            }
            .fail();
        }

        let kind = command.kind();
        let expected = core.state.balloon_version;
        let found = core.tree.size();
        let result = if command.is_tree_mutation() && found != expected {
            let err = DivergedSnafu { expected, found }.build();
            Err(self.halt(core, err))
        } else {
            match command {
                Command::AddEvent { digest } => self.apply_add(core, index, term, &[digest]),
                Command::AddEventsBulk { digests } => self.apply_add(core, index, term, &digests),
                Command::MetadataSet { node_id, kv } => {
                    self.apply_metadata(core, index, term, |registry| registry.set(&node_id, kv))
                },
                Command::MetadataDelete { node_id } => {
                    self.apply_metadata(core, index, term, |registry| registry.delete(&node_id))
                },
            }
        };

        let elapsed = start.elapsed();
        self.metrics.record_apply(kind, result.is_ok(), elapsed.as_secs_f64());
        if result.is_ok() {
            self.metrics.set_applied_index(index);
            self.metrics.set_tree_size(core.tree.size());
        }
        if elapsed > self.config.slow_apply_threshold {
            tracing::warn!(
                kind,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.config.slow_apply_threshold.as_millis() as u64,
                "Slow apply"
            );
        }
        result
    }

    fn apply_add(
        &self,
        core: &mut Core,
        index: u64,
        term: u64,
        digests: &[Hash],
    ) -> Result<ApplyOutcome, ApplyError> {
        let notifications = match Self::stage_and_commit(core, index, term, digests) {
            Ok(notifications) => notifications,
            Err(err) => {
                if let Err(rollback) = core.rollback() {
                    tracing::error!(error = %rollback, "Rollback after failed apply failed");
                    return Err(self.halt(core, err));
                }
                tracing::warn!(error = %err, "Apply failed, nothing was committed");
                return Err(err);
            },
        };

        let commitments = notifications
            .iter()
            .map(|n| Commitment { version: n.version, digest: n.history_digest })
            .collect();
        for notification in notifications {
            self.notifier.publish(notification);
        }
        Ok(ApplyOutcome::Added(commitments))
    }

    fn stage_and_commit(
        core: &mut Core,
        index: u64,
        term: u64,
        digests: &[Hash],
    ) -> Result<Vec<CommitmentNotification>, ApplyError> {
        let mut notifications = Vec::with_capacity(digests.len());
        for &event_digest in digests {
            let commitment = core.tree.add(event_digest).context(TreeSnafu)?;
            let hyper_digest =
                core.peer.add(event_digest, commitment.version).context(StorageSnafu)?;
            notifications.push(CommitmentNotification {
                history_digest: commitment.digest,
                hyper_digest,
                version: commitment.version,
                event_digest,
            });
        }

        let next = core.state.advance(index, term, core.tree.size());
        let mut batch = core.tree.store_mut().take_staged();
        batch.extend(core.peer.take_staged());
        batch.put(TableId::FsmState, FSM_STATE_KEY, encode(&next).context(CodecSnafu)?);
        commit_batch(core.engine(), &batch).context(StorageSnafu)?;

        core.state = next;
        Ok(notifications)
    }

    fn apply_metadata(
        &self,
        core: &mut Core,
        index: u64,
        term: u64,
        update: impl FnOnce(&dyn MetadataRegistry),
    ) -> Result<ApplyOutcome, ApplyError> {
        let next = core.state.advance(index, term, core.state.balloon_version);
        let mut batch = MutationBatch::new();
        batch.put(TableId::FsmState, FSM_STATE_KEY, encode(&next).context(CodecSnafu)?);
        commit_batch(core.engine(), &batch).context(StorageSnafu)?;

        core.state = next;
        update(self.metadata.registry());
        Ok(ApplyOutcome::MetadataUpdated)
    }

    fn halt(&self, core: &mut Core, err: ApplyError) -> ApplyError {
        if matches!(err, ApplyError::Diverged { .. }) {
            self.metrics.record_divergence();
        }
        tracing::error!(
            error = %err,
            index = core.state.index,
            balloon_version = core.state.balloon_version,
            tree_size = core.tree.size(),
            "State machine halted; refusing further applies"
        );
        core.halted = Some(err.to_string());
        err
    }

    /// Applied state.
    ///
    /// # Errors
    ///
    /// Returns `FsmError::NotOpen` after [`close`](Self::close).
    pub fn state(&self) -> Result<FsmState> {
        let guard = self.core.lock();
        Ok(guard.as_ref().context(NotOpenSnafu)?.state)
    }

    /// Whether a fatal error halted the state machine.
    pub fn is_halted(&self) -> bool {
        self.core.lock().as_ref().is_some_and(|core| core.halted.is_some())
    }

    /// Commitment of the tree at `version`.
    ///
    /// # Errors
    ///
    /// Returns a tree error unless `version < size`.
    pub fn commitment(&self, version: u64) -> Result<Commitment> {
        self.query(|core| core.tree.commitment(version).context(QuerySnafu))
    }

    /// Membership proof of the event with `event_digest` in the tree at `version`.
    ///
    /// # Errors
    ///
    /// Returns `FsmError::EventNotFound` if the digest was never added, or a
    /// tree error if it was added after `version`.
    pub fn query_membership(&self, event_digest: Hash, version: u64) -> Result<MembershipProof> {
        self.query(|core| {
            let index = core
                .peer
                .version_of(&event_digest)
                .context(StoreSnafu)?
                .context(EventNotFoundSnafu { digest: event_digest })?;
            core.tree.membership_proof(index, version, event_digest).context(QuerySnafu)
        })
    }

    /// Proof that the tree at `start` is a prefix of the tree at `end`.
    ///
    /// # Errors
    ///
    /// Returns a tree error unless `start <= end < size`.
    pub fn query_consistency(&self, start: u64, end: u64) -> Result<IncrementalProof> {
        self.query(|core| core.tree.incremental_proof(start, end).context(QuerySnafu))
    }

    /// Runs a read-only tree query.
    ///
    /// Queries may cache frozen nodes in the staging overlay; they are
    /// dropped afterwards so the next apply commits only its own writes.
    fn query<T>(&self, f: impl FnOnce(&mut Core) -> Result<T>) -> Result<T> {
        let mut guard = self.core.lock();
        let core = guard.as_mut().context(NotOpenSnafu)?;
        let result = f(core);
        core.tree.store_mut().discard_staged();
        result
    }

    /// Metadata value for `node_id`, or `""` when absent.
    pub fn metadata(&self, node_id: &str, key: &str) -> String {
        self.metadata.get(node_id, key)
    }

    /// Every metadata pair of `node_id`.
    pub fn metadata_for(&self, node_id: &str) -> std::collections::BTreeMap<String, String> {
        self.metadata.node(node_id)
    }

    /// Read handle over the metadata that outlives borrows of the state machine.
    pub fn metadata_handle(&self) -> MetadataHandle {
        self.metadata.clone()
    }

    /// Captures the current state for later streaming.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction cannot start or the
    /// metadata cannot be encoded.
    #[tracing::instrument(skip_all)]
    pub fn snapshot(&self) -> Result<FsmSnapshot> {
        let _restore = self.restore_lock.lock();
        let guard = self.core.lock();
        let core = guard.as_ref().context(NotOpenSnafu)?;

        let txn = core.engine().begin_read().context(StoreSnafu)?;
        let snapshot = FsmSnapshot::new(
            txn,
            core.state,
            &self.metadata.registry().export(),
            self.config.snapshot_compression_level,
            Arc::clone(&self.metrics),
        )
        .context(SnapshotSnafu)?;

        tracing::info!(
            index = core.state.index,
            balloon_version = core.state.balloon_version,
            "Captured snapshot"
        );
        Ok(snapshot)
    }

    /// Replaces the whole state with a snapshot stream.
    ///
    /// The tree size, the applied `balloon_version` and the peer chain are
    /// recomputed from the restored events; the transmitted version is only
    /// compared against. Clears a halt.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is corrupt or the store write fails.
    /// On error the previous state is left untouched.
    #[tracing::instrument(skip_all)]
    pub fn restore<R: Read>(&self, reader: R) -> Result<FsmState> {
        let start = Instant::now();
        let result = self.restore_inner(reader);
        let latency = start.elapsed().as_secs_f64();
        self.metrics.record_restore(result.is_ok(), latency);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Snapshot restore failed");
        }
        result
    }

    fn restore_inner<R: Read>(&self, reader: R) -> Result<FsmState> {
        let _restore = self.restore_lock.lock();
        let image = SnapshotImage::read_from(reader).context(SnapshotSnafu)?;

        let mut guard = self.core.lock();
        let core = guard.as_mut().context(NotOpenSnafu)?;

        let txn = core.engine().begin_write().context(StoreSnafu)?;
        image.install(&txn).context(StoreSnafu)?;
        let (size, chain) = recompute_from_events(&txn).context(StoreSnafu)?;

        if image.state.balloon_version != size {
            tracing::warn!(
                transmitted = image.state.balloon_version,
                recomputed = size,
                "Snapshot balloon version differs from its events; using recomputed value"
            );
        }
        let state = FsmState { balloon_version: size, ..image.state };

        let mut batch = MutationBatch::new();
        batch.put(TableId::PeerMeta, PEER_CHAIN_KEY, encode_chain_meta(&chain, size));
        batch.put(TableId::FsmState, FSM_STATE_KEY, encode(&state).context(StateRecordSnafu)?);
        batch.write(&txn).context(StoreSnafu)?;
        txn.commit().context(vellum_store::CommitSnafu).context(StoreSnafu)?;

        core.tree.store_mut().discard_staged();
        core.tree.refresh_size().context(QuerySnafu)?;
        core.peer.reload().context(StoreSnafu)?;
        core.state = state;
        if let Some(reason) = core.halted.take() {
            tracing::info!(previous = %reason, "Restore cleared halt");
        }
        self.metadata.registry().replace(image.metadata);

        self.metrics.set_applied_index(state.index);
        self.metrics.set_tree_size(size);
        tracing::info!(
            index = state.index,
            term = state.term,
            balloon_version = state.balloon_version,
            "Restored snapshot"
        );
        Ok(state)
    }

    /// Closes the state machine.
    ///
    /// Waits for an in-flight call to finish, then releases the store.
    /// Closing twice is a no-op; every later call fails with a closed error.
    pub fn close(&self) {
        if let Some(core) = self.core.lock().take() {
            tracing::info!(
                index = core.state.index,
                balloon_version = core.state.balloon_version,
                "Closed state machine"
            );
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.core.lock().is_none()
    }

}

impl StateMachine for ReplicatedStateMachine {
    type Snapshot = FsmSnapshot;

    fn apply(&self, index: u64, term: u64, command: &[u8]) -> Result<ApplyOutcome, ApplyError> {
        ReplicatedStateMachine::apply(self, index, term, command)
    }

    fn snapshot(&self) -> Result<FsmSnapshot> {
        ReplicatedStateMachine::snapshot(self)
    }

    fn restore(&self, reader: &mut dyn Read) -> Result<FsmState> {
        ReplicatedStateMachine::restore(self, reader)
    }
}

fn load_state(engine: &StorageEngine) -> Result<FsmState> {
    let txn = engine.begin_read().context(StoreSnafu)?;
    let table = txn
        .open_table(Tables::FSM_STATE)
        .context(vellum_store::TableSnafu)
        .context(StoreSnafu)?;
    let record = table.get(FSM_STATE_KEY).context(vellum_store::StorageSnafu).context(StoreSnafu)?;
    match record {
        Some(value) => decode(value.value()).context(StateRecordSnafu),
        None => Ok(FsmState::default()),
    }
}

fn commit_batch(engine: &StorageEngine, batch: &MutationBatch) -> vellum_store::Result<()> {
    let txn = engine.begin_write()?;
    batch.write(&txn)?;
    txn.commit().context(vellum_store::CommitSnafu)?;
    Ok(())
}

/// Counts the events written by `txn` and folds them into the peer chain.
fn recompute_from_events(txn: &WriteTransaction) -> vellum_store::Result<(u64, Hash)> {
    let table = txn.open_table(Tables::HISTORY_EVENTS).context(vellum_store::TableSnafu)?;
    let size = contiguous_event_count(&table)?;

    let mut events = Vec::new();
    for entry in table.iter().context(vellum_store::StorageSnafu)? {
        let (key, value) = entry.context(vellum_store::StorageSnafu)?;
        let digest = Hash::try_from(value.value()).ok().context(vellum_store::CorruptSnafu {
            reason: format!("event {} is not a 32-byte digest", hex::encode(key.value())),
        })?;
        events.push(digest);
    }

    let (chain, count) = rebuild_chain(events);
    ensure!(
        count == size,
        vellum_store::CorruptSnafu { reason: format!("folded {count} events, expected {size}") }
    );
    Ok((size, chain))
}
