//! Error types for the vellum store.

use snafu::{Location, Snafu};
use vellum_types::{CodecError, ErrorCode};

/// Result type alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors returned by [`StorageEngine`](crate::StorageEngine) and
/// [`LogEngine`](crate::LogEngine).
///
/// # Recovery Guide
///
/// | Variant        | Retryable | Recovery Action                                       |
/// | -------------- | --------- | ----------------------------------------------------- |
/// | `Open`         | No        | Check path, permissions, and that no other process holds the file |
/// | `Transaction`  | Yes       | Retry with backoff                                    |
/// | `Table`        | No        | Database schema mismatch; check versions              |
/// | `Storage`      | Maybe     | Disk I/O failure; check disk health                   |
/// | `Commit`       | Yes       | Retry with backoff                                    |
/// | `Codec`        | No        | Stored bytes do not decode; data corruption           |
/// | `LogNotFound`  | No        | Expected at compaction boundaries                     |
/// | `KeyNotFound`  | No        | Expected for unset keys                               |
/// | `Closed`       | No        | Reopen the store                                      |
/// | `Corrupt`      | No        | Restore from snapshot                                 |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The database file could not be opened or created.
    #[snafu(display("Failed to open database at {path}: {source}"))]
    Open {
        /// Database path.
        path: String,
        /// Underlying redb error.
        source: redb::DatabaseError,
    },

    /// A read or write transaction could not begin.
    #[snafu(display("Transaction error at {location}: {source}"))]
    Transaction {
        /// Underlying redb error.
        source: redb::TransactionError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A table could not be opened.
    #[snafu(display("Table error at {location}: {source}"))]
    Table {
        /// Underlying redb error.
        source: redb::TableError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A read or write against an open table failed.
    #[snafu(display("Storage error at {location}: {source}"))]
    Storage {
        /// Underlying redb error.
        source: redb::StorageError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A write transaction failed to commit.
    #[snafu(display("Commit error at {location}: {source}"))]
    Commit {
        /// Underlying redb error.
        source: redb::CommitError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// A stored record failed to encode or decode.
    #[snafu(display("Codec error at {location}: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// No log entry exists at the requested index.
    #[snafu(display("Log entry {index} not found"))]
    LogNotFound {
        /// Requested log index.
        index: u64,
    },

    /// No value exists for the requested stable key.
    #[snafu(display("Key {key} not found"))]
    KeyNotFound {
        /// Requested key, hex encoded.
        key: String,
    },

    /// The store was closed.
    #[snafu(display("Store is closed"))]
    Closed,

    /// Persisted data violates a structural invariant.
    #[snafu(display("Corrupt store: {reason}"))]
    Corrupt {
        /// What was wrong.
        reason: String,
    },
}

impl StoreError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Open { .. } => ErrorCode::StorageDatabaseOpen,
            Self::Transaction { .. } | Self::Commit { .. } => ErrorCode::StorageTransaction,
            Self::Table { .. } | Self::Storage { .. } => ErrorCode::StorageTableOperation,
            Self::Codec { .. } => ErrorCode::AppSerialization,
            Self::LogNotFound { .. } | Self::KeyNotFound { .. } => ErrorCode::StorageNotFound,
            Self::Closed => ErrorCode::StorageClosed,
            Self::Corrupt { .. } => ErrorCode::StorageCorruption,
        }
    }

    /// Whether this error reports a missing log entry or stable key.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::LogNotFound { .. } | Self::KeyNotFound { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_variants() {
        assert!(StoreError::LogNotFound { index: 3 }.is_not_found());
        assert!(StoreError::KeyNotFound { key: "00".to_string() }.is_not_found());
        assert!(!StoreError::Closed.is_not_found());
    }

    #[test]
    fn test_codes() {
        assert_eq!(StoreError::LogNotFound { index: 1 }.code(), ErrorCode::StorageNotFound);
        assert_eq!(StoreError::Closed.code(), ErrorCode::StorageClosed);
        assert_eq!(
            StoreError::Corrupt { reason: "gap".to_string() }.code(),
            ErrorCode::StorageCorruption
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(StoreError::LogNotFound { index: 42 }.to_string(), "Log entry 42 not found");
        assert_eq!(StoreError::Closed.to_string(), "Store is closed");
    }
}
