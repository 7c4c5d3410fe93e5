//! Error types for the history tree.

use snafu::{Location, Snafu};
use vellum_store::StoreError;
use vellum_types::ErrorCode;

use crate::position::Position;

/// Result type alias for history tree operations.
pub type Result<T, E = TreeError> = std::result::Result<T, E>;

/// Errors returned by [`HistoryTree`](crate::HistoryTree) and the node stores.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TreeError {
    /// A query named a version or index the tree cannot answer.
    ///
    /// Valid queries satisfy `start <= end < size`.
    #[snafu(display("Invalid range {start}..={end} for tree of size {size}"))]
    InvalidRange {
        /// Lower bound of the query (leaf index or start version).
        start: u64,
        /// Upper bound of the query (version).
        end: u64,
        /// Tree size at query time.
        size: u64,
    },

    /// A node needed for recomputation is absent.
    ///
    /// On a live tree this means the store lost an event. During proof
    /// verification it means the proof is incomplete.
    #[snafu(display("Missing node {position} at version {version}"))]
    MissingNode {
        /// Position that could not be resolved.
        position: Position,
        /// Version being computed.
        version: u64,
    },

    /// The backing store failed.
    #[snafu(display("Node store error at {location}: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl TreeError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRange { .. } => ErrorCode::TreeInvalidRange,
            Self::MissingNode { .. } => ErrorCode::TreeMissingNode,
            Self::Store { source, .. } => source.code(),
        }
    }
}
