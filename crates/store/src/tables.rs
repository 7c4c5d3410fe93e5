//! Table definitions for the log engine.
//!
//! The log engine keeps three logical partitions in one redb file. Raft log
//! keys are `u64`, which redb orders numerically, so range scans and
//! `first`/`last` follow log index order.

use redb::TableDefinition;

/// Table definitions for the log engine.
pub struct Tables;

impl Tables {
    /// Engine-level metadata: key → value
    /// Keys: "format_version"
    pub const GENERAL: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("general");

    /// Consensus metadata (current term, vote, node id): key → value
    pub const STABLE: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("stable");

    /// Raft log entries: log_index → postcard(LogEntry)
    pub const RAFT_LOG: TableDefinition<'static, u64, &'static [u8]> =
        TableDefinition::new("raft_log");
}

/// Key in [`Tables::GENERAL`] holding the on-disk format version.
pub const FORMAT_VERSION_KEY: &[u8] = b"format_version";

/// Current on-disk format version of the log engine.
pub const FORMAT_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use redb::TableHandle;

    use super::*;

    #[test]
    fn test_table_names_unique() {
        let names = [Tables::GENERAL.name(), Tables::STABLE.name(), Tables::RAFT_LOG.name()];

        let mut sorted = names.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len(), "Table names must be unique");
    }
}
