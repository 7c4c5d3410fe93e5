//! Table definitions for the state machine store.
//!
//! Every table is byte-keyed so that snapshots can stream them generically.
//! Keys carry their own fixed-width big-endian encoding.
//!
//! | Table            | Key                        | Value                          |
//! | ---------------- | -------------------------- | ------------------------------ |
//! | `history_events` | `{index:8BE}`              | event digest (32 bytes)        |
//! | `history_frozen` | `{index:8BE}{layer:8BE}`   | node digest (32 bytes)         |
//! | `version_index`  | event digest (32 bytes)    | `{version:8BE}`                |
//! | `peer_meta`      | `chain`                    | `{chain digest:32}{count:8BE}` |
//! | `fsm_state`      | `state`                    | postcard-encoded FSM state     |

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition};
use snafu::{OptionExt, ResultExt, ensure};
use vellum_store::{CorruptSnafu, Result, StorageSnafu};

use crate::position::decode_event_key;

type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table definitions owned by the state machine.
pub struct Tables;

impl Tables {
    /// Event digests keyed by leaf index.
    pub const HISTORY_EVENTS: BytesTable = TableDefinition::new("history_events");

    /// Cached digests of fully determined interior nodes.
    pub const HISTORY_FROZEN: BytesTable = TableDefinition::new("history_frozen");

    /// First version at which each event digest was added.
    pub const VERSION_INDEX: BytesTable = TableDefinition::new("version_index");

    /// Chained digest of the peer index.
    pub const PEER_META: BytesTable = TableDefinition::new("peer_meta");

    /// Applied `(index, term, balloon_version)` record.
    pub const FSM_STATE: BytesTable = TableDefinition::new("fsm_state");
}

/// Key of the chained digest record in `peer_meta`.
pub const PEER_CHAIN_KEY: &[u8] = b"chain";

/// Key of the FSM state record in `fsm_state`.
pub const FSM_STATE_KEY: &[u8] = b"state";

/// Stable numeric identifier of a table, used in batches and snapshot streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TableId {
    /// `history_events`.
    HistoryEvents = 1,
    /// `history_frozen`.
    HistoryFrozen = 2,
    /// `version_index`.
    VersionIndex = 3,
    /// `peer_meta`.
    PeerMeta = 4,
    /// `fsm_state`.
    FsmState = 5,
}

impl TableId {
    /// Every table, in id order.
    pub const ALL: [TableId; 5] = [
        TableId::HistoryEvents,
        TableId::HistoryFrozen,
        TableId::VersionIndex,
        TableId::PeerMeta,
        TableId::FsmState,
    ];

    /// Tables carried verbatim in a snapshot image.
    ///
    /// `fsm_state` travels as its own section and is rewritten on restore.
    pub const SNAPSHOT: [TableId; 4] =
        [TableId::HistoryEvents, TableId::HistoryFrozen, TableId::VersionIndex, TableId::PeerMeta];

    /// Numeric id.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a table by numeric id.
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::HistoryEvents),
            2 => Some(Self::HistoryFrozen),
            3 => Some(Self::VersionIndex),
            4 => Some(Self::PeerMeta),
            5 => Some(Self::FsmState),
            _ => None,
        }
    }

    /// redb definition of the table.
    pub const fn definition(self) -> BytesTable {
        match self {
            Self::HistoryEvents => Tables::HISTORY_EVENTS,
            Self::HistoryFrozen => Tables::HISTORY_FROZEN,
            Self::VersionIndex => Tables::VERSION_INDEX,
            Self::PeerMeta => Tables::PEER_META,
            Self::FsmState => Tables::FSM_STATE,
        }
    }

    /// Every table definition, for [`StorageEngine::ensure_tables`](vellum_store::StorageEngine::ensure_tables).
    pub fn definitions() -> [BytesTable; 5] {
        Self::ALL.map(Self::definition)
    }
}

/// Counts the events in an events table, checking they form `0..count`.
///
/// # Errors
///
/// Returns `StoreError::Corrupt` if the keys are malformed or leave a gap.
pub fn contiguous_event_count<T>(table: &T) -> Result<u64>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let len = table.len().context(StorageSnafu)?;
    let last = table.last().context(StorageSnafu)?;
    let Some((key, _)) = last else {
        return Ok(0);
    };
    let last_index = decode_event_key(key.value())
        .context(CorruptSnafu { reason: format!("bad event key {}", hex::encode(key.value())) })?;
    ensure!(
        last_index.checked_add(1) == Some(len),
        CorruptSnafu {
            reason: format!("event table holds {len} entries but last index is {last_index}")
        }
    );
    Ok(len)
}
