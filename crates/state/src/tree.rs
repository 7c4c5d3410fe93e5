//! Append-only authenticated history tree.
//!
//! The tree commits to a growing sequence of event digests. Version `v` is
//! the tree after `v + 1` additions, and its commitment is the digest of
//! position `(0, depth(v + 1))` evaluated at `v`.
//!
//! # Node values
//!
//! `A_v(i, r)`, the value of the subtree at `(i, r)` as seen at version `v`:
//!
//! - `r = 0` and `v >= i`: `H(0x00 ‖ event_i)`
//! - `v < i + 2^(r-1)`: `H(0x01 ‖ A_v(i, r-1) ‖ 0x00)`, the right half is empty
//! - otherwise: `H(0x01 ‖ A_v(i, r-1) ‖ A_v(i + 2^(r-1), r-1))`
//!
//! A node with `v >= i + 2^r - 1` has every leaf present and never changes
//! again, so its value is frozen in the store on first computation and read
//! back for every later version.

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};
use vellum_types::{Hash, interior_hash, leaf_hash, partial_hash};

use crate::{
    error::{InvalidRangeSnafu, MissingNodeSnafu, Result, StoreSnafu},
    node_store::NodeStore,
    position::Position,
    proof::{AuditNode, IncrementalProof, MembershipProof},
};

/// Commitment to the tree at one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Version committed to.
    pub version: u64,
    /// Root digest at that version.
    pub digest: Hash,
}

/// Authenticated append-only history tree over a [`NodeStore`].
#[derive(Debug)]
pub struct HistoryTree<S> {
    store: S,
    size: u64,
}

impl<S: NodeStore> HistoryTree<S> {
    /// Creates a tree over an empty store.
    pub fn new(store: S) -> Self {
        Self { store, size: 0 }
    }

    /// Creates a tree over a store that may already hold events, recovering
    /// the size from the event count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or its events have a gap.
    pub fn with_size(store: S) -> Result<Self> {
        let mut tree = Self { store, size: 0 };
        tree.refresh_size()?;
        Ok(tree)
    }

    /// Re-reads the size from the store. Used after the store contents were
    /// replaced or staged nodes were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or its events have a gap.
    pub fn refresh_size(&mut self) -> Result<u64> {
        self.size = self.store.event_count().context(StoreSnafu)?;
        Ok(self.size)
    }

    /// Number of events added. The current version is `size - 1`.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current version, or `None` for an empty tree.
    pub fn version(&self) -> Option<u64> {
        self.size.checked_sub(1)
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the backing store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the tree, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Appends an event and returns the commitment to the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. The size is left unchanged in
    /// that case, but the store may hold the new event.
    pub fn add(&mut self, event_digest: Hash) -> Result<Commitment> {
        let version = self.size;
        self.store.put_event(version, event_digest).context(StoreSnafu)?;

        let digest = self.node(Position::root(version), version)?;
        self.size += 1;

        tracing::trace!(version, root = %hex::encode(digest), "Added event to history tree");
        Ok(Commitment { version, digest })
    }

    /// Commitment to any version already added.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidRange` unless `version < size`.
    pub fn commitment(&mut self, version: u64) -> Result<Commitment> {
        ensure!(
            version < self.size,
            InvalidRangeSnafu { start: version, end: version, size: self.size }
        );
        let digest = self.node(Position::root(version), version)?;
        Ok(Commitment { version, digest })
    }

    /// Proof that `event_digest` sits at leaf `index` of the tree at `version`.
    ///
    /// The proof carries the supplied digest as is; it only verifies when
    /// that digest is the one stored at `index`.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidRange` unless `index <= version < size`.
    pub fn membership_proof(
        &mut self,
        index: u64,
        version: u64,
        event_digest: Hash,
    ) -> Result<MembershipProof> {
        ensure!(
            index <= version && version < self.size,
            InvalidRangeSnafu { start: index, end: version, size: self.size }
        );

        let root = Position::root(version);
        let root_digest = self.node(root, version)?;

        let mut audit_nodes = Vec::with_capacity(root.layer as usize);
        let mut current = root;
        while current.layer > 0 {
            let (left, right) = current.children();
            if index < right.index {
                // Right sibling only contributes once it holds an event.
                if version >= right.index {
                    audit_nodes.push(self.audit(right, version)?);
                }
                current = left;
            } else {
                audit_nodes.push(self.audit(left, version)?);
                current = right;
            }
        }

        Ok(MembershipProof { index, version, event_digest, root: root_digest, audit_nodes })
    }

    /// Proof that the tree at `start` is a prefix of the tree at `end`.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidRange` unless `start <= end < size`.
    pub fn incremental_proof(&mut self, start: u64, end: u64) -> Result<IncrementalProof> {
        ensure!(start <= end && end < self.size, InvalidRangeSnafu { start, end, size: self.size });

        let start_event = self.event(start, end)?;
        let end_event = self.event(end, end)?;

        let mut audit_nodes = Vec::new();
        let mut pending = vec![Position::root(end)];
        while let Some(position) = pending.pop() {
            if position.layer == 0 {
                continue;
            }
            let (left, right) = position.children();
            for child in [right, left] {
                if child.index > end {
                    continue;
                }
                if child.covers(start) || child.covers(end) {
                    pending.push(child);
                } else {
                    audit_nodes.push(self.audit(child, end)?);
                }
            }
        }
        audit_nodes.sort_by_key(|node| node.position);

        Ok(IncrementalProof { start, end, start_event, end_event, audit_nodes })
    }

    fn audit(&mut self, position: Position, version: u64) -> Result<AuditNode> {
        let digest = self.node(position, version)?;
        Ok(AuditNode { position, digest })
    }

    fn event(&self, index: u64, version: u64) -> Result<Hash> {
        let digest = self.store.event(index).context(StoreSnafu)?;
        digest.context(MissingNodeSnafu { position: Position::new(index, 0), version })
    }

    /// Computes `A_version(position)`, freezing fully determined nodes.
    pub(crate) fn node(&mut self, position: Position, version: u64) -> Result<Hash> {
        if let Some(digest) = self.store.pinned(position) {
            return Ok(digest);
        }

        let full = position.is_full_at(version);
        if full {
            if let Some(digest) = self.store.frozen(position).context(StoreSnafu)? {
                return Ok(digest);
            }
        }

        let digest = if position.layer == 0 {
            ensure!(version >= position.index, MissingNodeSnafu { position, version });
            leaf_hash(&self.event(position.index, version)?)
        } else {
            let (left, right) = position.children();
            let left_digest = self.node(left, version)?;
            if version < right.index {
                partial_hash(&left_digest)
            } else {
                let right_digest = self.node(right, version)?;
                interior_hash(&left_digest, &right_digest)
            }
        };

        if full {
            self.store.put_frozen(position, digest).context(StoreSnafu)?;
        }
        Ok(digest)
    }
}
