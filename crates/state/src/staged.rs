//! redb-backed node store with staged writes.

use parking_lot::Mutex;
use redb::{ReadTransaction, ReadableTable};
use snafu::{OptionExt, ResultExt};
use vellum_store::{CorruptSnafu, Result, StorageEngine, StorageSnafu, TableSnafu};
use vellum_types::Hash;

use crate::{
    batch::MutationBatch,
    node_store::NodeStore,
    position::{Position, event_key},
    tables::{TableId, Tables, contiguous_event_count},
};

/// Node store over the `history_events` and `history_frozen` tables.
///
/// Writes land in an in-memory [`MutationBatch`] and reads consult it
/// before the database, so the tree sees its own uncommitted nodes. The
/// owner commits with [`take_staged`](Self::take_staged) or drops the
/// pending nodes with [`discard_staged`](Self::discard_staged).
///
/// Database reads share one read transaction, opened by the first lookup
/// and released by `take_staged` and `discard_staged`. Between those calls
/// the store sees the database as of that first lookup.
pub struct StagedNodeStore {
    engine: StorageEngine,
    staged: MutationBatch,
    reader: Mutex<Option<ReadTransaction>>,
}

impl std::fmt::Debug for StagedNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedNodeStore")
            .field("engine", &self.engine)
            .field("staged", &self.staged.len())
            .field("reading", &self.reader.lock().is_some())
            .finish()
    }
}

impl StagedNodeStore {
    /// Wraps an engine whose tables already exist.
    pub fn new(engine: StorageEngine) -> Self {
        Self { engine, staged: MutationBatch::new(), reader: Mutex::new(None) }
    }

    /// Underlying engine.
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Hands over every staged node, leaving the overlay empty.
    pub fn take_staged(&mut self) -> MutationBatch {
        self.release_reader();
        std::mem::take(&mut self.staged)
    }

    /// Drops every staged node.
    pub fn discard_staged(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!(entries = self.staged.len(), "Discarding staged history nodes");
        }
        self.staged.clear();
        self.release_reader();
    }

    /// Whether a read transaction is currently held.
    pub fn is_reading(&self) -> bool {
        self.reader.lock().is_some()
    }

    fn release_reader(&mut self) {
        self.reader.get_mut().take();
    }

    /// Number of staged entries.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn read(&self, table: TableId, key: &[u8]) -> Result<Option<Hash>> {
        if let Some(value) = self.staged.get(table, key) {
            return decode_digest(value).map(Some);
        }

        let mut reader = self.reader.lock();
        let txn = match reader.take() {
            Some(txn) => txn,
            None => self.engine.begin_read()?,
        };
        let digest = lookup(&txn, table, key);
        *reader = Some(txn);
        digest
    }
}

impl NodeStore for StagedNodeStore {
    fn event(&self, index: u64) -> Result<Option<Hash>> {
        self.read(TableId::HistoryEvents, &event_key(index))
    }

    fn put_event(&mut self, index: u64, digest: Hash) -> Result<()> {
        self.staged.put(TableId::HistoryEvents, event_key(index), digest);
        Ok(())
    }

    fn frozen(&self, position: Position) -> Result<Option<Hash>> {
        self.read(TableId::HistoryFrozen, &position.key())
    }

    fn put_frozen(&mut self, position: Position, digest: Hash) -> Result<()> {
        self.staged.put(TableId::HistoryFrozen, position.key(), digest);
        Ok(())
    }

    fn event_count(&self) -> Result<u64> {
        let txn = self.engine.begin_read()?;
        let table = txn.open_table(Tables::HISTORY_EVENTS).context(TableSnafu)?;
        let committed = contiguous_event_count(&table)?;
        Ok(committed + self.staged.count(TableId::HistoryEvents) as u64)
    }
}

fn lookup(txn: &ReadTransaction, table: TableId, key: &[u8]) -> Result<Option<Hash>> {
    let handle = txn.open_table(table.definition()).context(TableSnafu)?;
    let value = handle.get(key).context(StorageSnafu)?;
    match value {
        Some(guard) => decode_digest(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn decode_digest(bytes: &[u8]) -> Result<Hash> {
    bytes.try_into().ok().context(CorruptSnafu {
        reason: format!("node digest is {} bytes, expected 32", bytes.len()),
    })
}
