//! Peer index maintained next to the history tree.
//!
//! Every event added to the history tree is also added to a peer structure
//! that answers "at which version was this digest added?". [`VersionIndex`]
//! keeps that mapping in the `version_index` table and folds each addition
//! into a running chained digest, reported alongside every history
//! commitment.

use redb::ReadableTable;
use snafu::{OptionExt, ResultExt};
use vellum_store::{CorruptSnafu, Result, StorageEngine, StorageSnafu, TableSnafu};
use vellum_types::{Hash, ZERO_HASH, chain_hash};

use crate::{
    batch::MutationBatch,
    tables::{PEER_CHAIN_KEY, TableId},
};

/// Encoded length of the chain record: digest then count.
const CHAIN_META_LEN: usize = 40;

/// Authenticated structure updated in lockstep with the history tree.
pub trait PeerIndex {
    /// Records `event_digest` as added at `version` and returns the
    /// structure's new digest.
    fn add(&mut self, event_digest: Hash, version: u64) -> Result<Hash>;

    /// Version at which `event_digest` was first added.
    fn version_of(&self, event_digest: &Hash) -> Result<Option<u64>>;

    /// Current digest.
    fn digest(&self) -> Hash;

    /// Number of additions folded into the digest.
    fn count(&self) -> u64;
}

/// redb-backed [`PeerIndex`] with staged writes.
///
/// Like [`StagedNodeStore`](crate::StagedNodeStore), writes are buffered
/// until the owner takes them for a shared commit. The in-memory chain
/// digest runs ahead of the database while writes are staged;
/// [`discard_staged`](Self::discard_staged) rewinds it.
#[derive(Debug, Clone)]
pub struct VersionIndex {
    engine: StorageEngine,
    staged: MutationBatch,
    chain: Hash,
    count: u64,
}

impl VersionIndex {
    /// Opens the index over an engine whose tables already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain record cannot be read or is malformed.
    pub fn open(engine: StorageEngine) -> Result<Self> {
        let mut index = Self { engine, staged: MutationBatch::new(), chain: ZERO_HASH, count: 0 };
        index.reload()?;
        Ok(index)
    }

    /// Drops staged writes and re-reads the chain from the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain record cannot be read or is malformed.
    pub fn reload(&mut self) -> Result<()> {
        self.staged.clear();
        let txn = self.engine.begin_read()?;
        let table = txn.open_table(TableId::PeerMeta.definition()).context(TableSnafu)?;
        let record = table.get(PEER_CHAIN_KEY).context(StorageSnafu)?;
        let (chain, count) = match record {
            Some(value) => decode_chain_meta(value.value())?,
            None => (ZERO_HASH, 0),
        };
        self.chain = chain;
        self.count = count;
        Ok(())
    }

    /// Hands over every staged write. The chain digest is kept.
    pub fn take_staged(&mut self) -> MutationBatch {
        std::mem::take(&mut self.staged)
    }

    /// Drops staged writes and rewinds the chain to its committed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed chain record cannot be read.
    pub fn discard_staged(&mut self) -> Result<()> {
        self.reload()
    }
}

impl PeerIndex for VersionIndex {
    fn add(&mut self, event_digest: Hash, version: u64) -> Result<Hash> {
        if self.version_of(&event_digest)?.is_none() {
            self.staged.put(TableId::VersionIndex, event_digest, version.to_be_bytes());
        }
        self.chain = chain_hash(&self.chain, &event_digest, version);
        self.count += 1;
        let record = encode_chain_meta(&self.chain, self.count);
        self.staged.put(TableId::PeerMeta, PEER_CHAIN_KEY, record);
        Ok(self.chain)
    }

    fn version_of(&self, event_digest: &Hash) -> Result<Option<u64>> {
        if let Some(bytes) = self.staged.get(TableId::VersionIndex, event_digest) {
            return decode_version(bytes).map(Some);
        }

        let txn = self.engine.begin_read()?;
        let table = txn.open_table(TableId::VersionIndex.definition()).context(TableSnafu)?;
        let value = table.get(event_digest.as_slice()).context(StorageSnafu)?;
        let version = match value {
            Some(guard) => Some(decode_version(guard.value())?),
            None => None,
        };
        Ok(version)
    }

    fn digest(&self) -> Hash {
        self.chain
    }

    fn count(&self) -> u64 {
        self.count
    }
}

/// Folds events, in version order, into the chain they would produce.
///
/// Returns the chain digest and the number of events folded.
pub fn rebuild_chain(events: impl IntoIterator<Item = Hash>) -> (Hash, u64) {
    events.into_iter().fold((ZERO_HASH, 0), |(chain, version), event| {
        (chain_hash(&chain, &event, version), version + 1)
    })
}

/// Encodes the chain record: `{digest:32}{count:8BE}`.
pub fn encode_chain_meta(chain: &Hash, count: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CHAIN_META_LEN);
    bytes.extend_from_slice(chain);
    bytes.extend_from_slice(&count.to_be_bytes());
    bytes
}

/// Decodes a chain record written by [`encode_chain_meta`].
///
/// # Errors
///
/// Returns `StoreError::Corrupt` if the record has the wrong length.
pub fn decode_chain_meta(bytes: &[u8]) -> Result<(Hash, u64)> {
    let malformed =
        || CorruptSnafu { reason: format!("chain record is {} bytes, expected 40", bytes.len()) };
    let chain: Hash = bytes.get(..32).and_then(|b| b.try_into().ok()).with_context(malformed)?;
    let count = bytes
        .get(32..)
        .filter(|b| b.len() == 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .with_context(malformed)?;
    Ok((chain, count))
}

fn decode_version(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().ok().context(CorruptSnafu {
        reason: format!("version entry is {} bytes, expected 8", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use vellum_test_utils::TestDir;
    use vellum_types::{config::Durability, event_digest};

    use super::*;

    fn engine(dir: &TestDir) -> StorageEngine {
        let engine =
            StorageEngine::open(dir.join("peer.redb"), 1024 * 1024, Durability::Relaxed).unwrap();
        engine.ensure_tables(&TableId::definitions()).unwrap();
        engine
    }

    fn commit(index: &mut VersionIndex) {
        let batch = index.take_staged();
        let txn = index.engine.begin_write().unwrap();
        batch.write(&txn).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_empty_index() {
        let dir = TestDir::new();
        let index = VersionIndex::open(engine(&dir)).unwrap();
        assert_eq!(index.digest(), ZERO_HASH);
        assert_eq!(index.count(), 0);
        assert_eq!(index.version_of(&event_digest(b"a")).unwrap(), None);
    }

    #[test]
    fn test_add_chains_and_indexes() {
        let dir = TestDir::new();
        let mut index = VersionIndex::open(engine(&dir)).unwrap();
        let a = event_digest(b"a");
        let b = event_digest(b"b");

        let first = index.add(a, 0).unwrap();
        assert_eq!(first, chain_hash(&ZERO_HASH, &a, 0));
        let second = index.add(b, 1).unwrap();
        assert_eq!(second, chain_hash(&first, &b, 1));

        assert_eq!(index.version_of(&a).unwrap(), Some(0));
        assert_eq!(index.version_of(&b).unwrap(), Some(1));
        assert_eq!(rebuild_chain([a, b]), (second, 2));
    }

    #[test]
    fn test_duplicate_keeps_first_version() {
        let dir = TestDir::new();
        let mut index = VersionIndex::open(engine(&dir)).unwrap();
        let a = event_digest(b"a");
        index.add(a, 0).unwrap();
        commit(&mut index);
        index.add(a, 1).unwrap();
        assert_eq!(index.version_of(&a).unwrap(), Some(0));
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn test_discard_rewinds_chain() {
        let dir = TestDir::new();
        let mut index = VersionIndex::open(engine(&dir)).unwrap();
        let committed = index.add(event_digest(b"a"), 0).unwrap();
        commit(&mut index);

        index.add(event_digest(b"b"), 1).unwrap();
        index.discard_staged().unwrap();
        assert_eq!(index.digest(), committed);
        assert_eq!(index.count(), 1);
        assert_eq!(index.version_of(&event_digest(b"b")).unwrap(), None);
    }

    #[test]
    fn test_chain_survives_reopen() {
        let dir = TestDir::new();
        let engine = engine(&dir);
        let digest = {
            let mut index = VersionIndex::open(engine.clone()).unwrap();
            let digest = index.add(event_digest(b"a"), 0).unwrap();
            commit(&mut index);
            digest
        };
        let reopened = VersionIndex::open(engine).unwrap();
        assert_eq!(reopened.digest(), digest);
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn test_chain_meta_codec() {
        let chain = event_digest(b"chain");
        let bytes = encode_chain_meta(&chain, 7);
        assert_eq!(bytes.len(), CHAIN_META_LEN);
        assert_eq!(decode_chain_meta(&bytes).unwrap(), (chain, 7));
        assert!(decode_chain_meta(&bytes[..39]).is_err());
        assert!(decode_chain_meta(&[bytes.as_slice(), &[0]].concat()).is_err());
    }
}
