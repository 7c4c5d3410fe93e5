//! Error types for the replicated state machine.
//!
//! `apply` has its own error enum because the consensus layer needs to tell
//! an expected duplicate delivery apart from a broken replica; everything
//! else the state machine does reports [`FsmError`].

use snafu::{Location, Snafu};
use vellum_state::TreeError;
use vellum_store::StoreError;
use vellum_types::{CodecError, ErrorCode, Hash};

use crate::{command::CommandError, snapshot::SnapshotError};

/// Result type alias for state machine operations other than `apply`.
pub type Result<T, E = FsmError> = std::result::Result<T, E>;

/// Errors returned by [`ReplicatedStateMachine::apply`](crate::ReplicatedStateMachine::apply).
///
/// # Recovery Guide
///
/// | Variant       | Fatal | Recovery Action                                        |
/// | ------------- | ----- | ------------------------------------------------------ |
/// | `Stale`       | No    | None; the command was already applied                  |
/// | `Decode`      | No    | None; the entry can never apply                        |
/// | `Storage`     | No    | Node is behind; re-apply later or restore a snapshot   |
/// | `Tree`        | No    | Same as `Storage`                                      |
/// | `Codec`       | No    | Same as `Storage`                                      |
/// | `Diverged`    | Yes   | Stop the node and rebuild it from a healthy snapshot   |
/// | `Unavailable` | Yes   | Restore a snapshot or restart the node                 |
/// | `Closed`      | No    | Reopen the state machine                               |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApplyError {
    /// The command was already applied; nothing changed.
    #[snafu(display(
        "Stale command at index {index} term {term}: already applied up to index {applied_index} term {applied_term}"
    ))]
    Stale {
        /// Log index of the rejected command.
        index: u64,
        /// Log term of the rejected command.
        term: u64,
        /// Last applied index.
        applied_index: u64,
        /// Last applied term.
        applied_term: u64,
    },

    /// The command bytes did not decode.
    #[snafu(display("Malformed command at index {index}: {source}"))]
    Decode {
        /// Log index of the command.
        index: u64,
        /// Underlying decode error.
        source: CommandError,
    },

    /// The store failed while applying.
    #[snafu(display("Storage error at {location}: {source}"))]
    Storage {
        /// Underlying store error.
        source: StoreError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The history tree failed while applying.
    #[snafu(display("History tree error at {location}: {source}"))]
    Tree {
        /// Underlying tree error.
        source: TreeError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The FSM state record failed to encode.
    #[snafu(display("State codec error at {location}: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The tree version no longer matches the applied state.
    #[snafu(display("Replica diverged: expected tree version {expected}, found {found}"))]
    Diverged {
        /// Version recorded in the applied state.
        expected: u64,
        /// Version the tree actually holds.
        found: u64,
    },

    /// The state machine halted after a fatal error.
    #[snafu(display("State machine unavailable: {reason}"))]
    Unavailable {
        /// The error that halted it.
        reason: String,
    },

    /// The state machine was closed.
    #[snafu(display("State machine is closed"))]
    Closed,
}

impl ApplyError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Stale { .. } => ErrorCode::StateMachineStale,
            Self::Decode { source, .. } => source.code(),
            Self::Storage { source, .. } => source.code(),
            Self::Tree { source, .. } => source.code(),
            Self::Codec { source, .. } => source.code(),
            Self::Diverged { .. } => ErrorCode::StateMachineDiverged,
            Self::Unavailable { .. } => ErrorCode::StateMachineUnavailable,
            Self::Closed => ErrorCode::StorageClosed,
        }
    }

    /// Whether the node must stop applying commands.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Diverged { .. } | Self::Unavailable { .. })
    }

    /// Whether the command was a duplicate delivery.
    ///
    /// Callers answer the original client with a success-shaped no-op.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Errors from opening, querying, snapshotting and restoring the state machine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FsmError {
    /// The store failed.
    #[snafu(display("Storage error at {location}: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A history tree query failed.
    #[snafu(display("History tree query error at {location}: {source}"))]
    Query {
        /// Underlying tree error.
        source: TreeError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The persisted FSM state record failed to encode or decode.
    #[snafu(display("State record error at {location}: {source}"))]
    StateRecord {
        /// Underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Persisted state disagrees with the persisted tree.
    #[snafu(display("Inconsistent store: expected tree version {expected}, found {found}"))]
    Inconsistent {
        /// Value recorded in the applied state.
        expected: u64,
        /// Value recomputed from the store.
        found: u64,
    },

    /// A membership query named a digest that was never added.
    #[snafu(display("Event {} not found", hex::encode(digest)))]
    EventNotFound {
        /// Digest queried.
        digest: Hash,
    },

    /// A snapshot stream could not be written or read.
    #[snafu(display("Snapshot error: {source}"))]
    Snapshot {
        /// Underlying snapshot error.
        source: SnapshotError,
    },

    /// The state machine was closed.
    #[snafu(display("State machine is closed"))]
    NotOpen,
}

impl FsmError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store { source, .. } => source.code(),
            Self::Query { source, .. } => source.code(),
            Self::StateRecord { source, .. } => source.code(),
            Self::Inconsistent { .. } => ErrorCode::StateMachineDiverged,
            Self::EventNotFound { .. } => ErrorCode::StorageNotFound,
            Self::Snapshot { source } => source.code(),
            Self::NotOpen => ErrorCode::StorageClosed,
        }
    }
}
