//! Machine-readable error codes shared by every vellum crate.
//!
//! Each crate defines its own snafu error enum. Every variant of those enums
//! maps to an [`ErrorCode`] with a unique numeric identifier, a retryability
//! classification and a suggested recovery action, so a host process can
//! make policy decisions without matching on crate-specific types.

use core::fmt;

/// Machine-readable error codes for programmatic error handling.
///
/// Codes are organized into ranges:
///
/// | Range       | Domain        | Examples                                  |
/// |-------------|---------------|-------------------------------------------|
/// | 1000–1099   | Storage       | Database open, transaction, table ops     |
/// | 1100–1199   | Storage I/O   | Corruption, snapshot stream               |
/// | 2000–2099   | State machine | Stale command, divergence, unavailable    |
/// | 3000–3099   | History tree  | Invalid proof range                       |
/// | 3200–3299   | Application   | Serialization, config, I/O, internal      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Storage errors (1000–1199) ---
    /// Database file could not be opened.
    StorageDatabaseOpen = 1000,
    /// Transaction begin or commit failed.
    StorageTransaction = 1001,
    /// Table operation failed.
    StorageTableOperation = 1002,
    /// Requested key or log entry does not exist.
    StorageNotFound = 1003,
    /// The store has been closed.
    StorageClosed = 1004,
    /// Snapshot stream creation or restoration failed.
    StorageSnapshot = 1100,
    /// Data corruption detected (checksum mismatch, invalid structure).
    StorageCorruption = 1101,

    // --- State machine errors (2000–2099) ---
    /// Command was already applied (stale or duplicate delivery).
    StateMachineStale = 2000,
    /// Replica diverged from the deterministic apply sequence.
    StateMachineDiverged = 2001,
    /// State machine refuses work after a fatal error or close.
    StateMachineUnavailable = 2002,
    /// Command bytes could not be decoded.
    StateMachineMalformedCommand = 2003,

    // --- History tree errors (3000–3099) ---
    /// Proof or commitment requested outside `0 <= index <= version < size`.
    TreeInvalidRange = 3000,
    /// A node required to compute a digest is missing from the store.
    TreeMissingNode = 3001,

    // --- Application errors (3200–3299) ---
    /// Serialization or deserialization error.
    AppSerialization = 3200,
    /// Configuration error.
    AppConfig = 3201,
    /// Filesystem I/O error.
    AppIo = 3202,
    /// Internal error (unexpected state, invariant violation).
    AppInternal = 3204,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StorageDatabaseOpen),
            1001 => Some(Self::StorageTransaction),
            1002 => Some(Self::StorageTableOperation),
            1003 => Some(Self::StorageNotFound),
            1004 => Some(Self::StorageClosed),
            1100 => Some(Self::StorageSnapshot),
            1101 => Some(Self::StorageCorruption),
            2000 => Some(Self::StateMachineStale),
            2001 => Some(Self::StateMachineDiverged),
            2002 => Some(Self::StateMachineUnavailable),
            2003 => Some(Self::StateMachineMalformedCommand),
            3000 => Some(Self::TreeInvalidRange),
            3001 => Some(Self::TreeMissingNode),
            3200 => Some(Self::AppSerialization),
            3201 => Some(Self::AppConfig),
            3202 => Some(Self::AppIo),
            3204 => Some(Self::AppInternal),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Retryable errors may succeed on a later attempt. The library itself
    /// never retries; the caller owns the retry and backoff policy.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StorageTransaction | Self::StorageSnapshot | Self::AppIo)
    }

    /// Whether this error means the node must stop applying commands.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::StateMachineDiverged | Self::StorageCorruption)
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StorageDatabaseOpen => {
                "Verify the database path exists with correct permissions and is not opened by another process."
            },
            Self::StorageTransaction => {
                "Retry with backoff. Only one write transaction can be active at a time."
            },
            Self::StorageTableOperation => {
                "Check disk health and that the database was created by a compatible version."
            },
            Self::StorageNotFound => {
                "Expected at log compaction boundaries and for unset keys. Treat as a miss."
            },
            Self::StorageClosed => "The store was closed. Reopen it before issuing further calls.",
            Self::StorageSnapshot => {
                "Check disk space and the integrity of the snapshot source, then retry."
            },
            Self::StorageCorruption => {
                "Discard the local state and restore from a snapshot taken on a healthy peer."
            },
            Self::StateMachineStale => {
                "Not an error. The command was already applied. Treat as idempotent success."
            },
            Self::StateMachineDiverged => {
                "Stop the node. Its history no longer matches the replicated sequence; rebuild it from a healthy snapshot."
            },
            Self::StateMachineUnavailable => {
                "The state machine is closed or halted after a fatal error. Restart the node."
            },
            Self::StateMachineMalformedCommand => {
                "Reject the entry. The proposer produced bytes this version cannot decode."
            },
            Self::TreeInvalidRange => "Request a version and index within the current tree size.",
            Self::TreeMissingNode => {
                "The node store is incomplete. Restore from a snapshot taken on a healthy peer."
            },
            Self::AppSerialization => {
                "Codec bug or data corruption. Report as an issue with serialized data context."
            },
            Self::AppConfig => "Fix the configuration value and restart.",
            Self::AppIo => "Check disk space, filesystem permissions, and mount health.",
            Self::AppInternal => {
                "Unexpected state or invariant violation. Collect context and report as an issue."
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    const ALL_CODES: [ErrorCode; 17] = [
        ErrorCode::StorageDatabaseOpen,
        ErrorCode::StorageTransaction,
        ErrorCode::StorageTableOperation,
        ErrorCode::StorageNotFound,
        ErrorCode::StorageClosed,
        ErrorCode::StorageSnapshot,
        ErrorCode::StorageCorruption,
        ErrorCode::StateMachineStale,
        ErrorCode::StateMachineDiverged,
        ErrorCode::StateMachineUnavailable,
        ErrorCode::StateMachineMalformedCommand,
        ErrorCode::TreeInvalidRange,
        ErrorCode::TreeMissingNode,
        ErrorCode::AppSerialization,
        ErrorCode::AppConfig,
        ErrorCode::AppIo,
        ErrorCode::AppInternal,
    ];

    #[test]
    fn test_error_code_roundtrip_through_u16() {
        for code in ALL_CODES {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code), "{code:?}");
        }
        assert_eq!(ErrorCode::from_u16(9999), None);
    }

    #[test]
    fn test_error_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_u16()), "duplicate code {code}");
        }
    }

    #[test]
    fn test_divergence_is_fatal_and_not_retryable() {
        assert!(ErrorCode::StateMachineDiverged.is_fatal());
        assert!(!ErrorCode::StateMachineDiverged.is_retryable());
        assert!(!ErrorCode::StateMachineStale.is_fatal());
    }

    #[test]
    fn test_suggested_actions_are_non_empty() {
        for code in ALL_CODES {
            assert!(!code.suggested_action().is_empty(), "{code:?}");
        }
    }

    #[test]
    fn test_display_is_numeric() {
        assert_eq!(ErrorCode::StateMachineStale.to_string(), "2000");
    }
}
