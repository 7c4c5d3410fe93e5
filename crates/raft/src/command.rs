//! State machine commands and their wire format.
//!
//! A command on the wire is one tag byte followed by the postcard encoding
//! of the variant's payload:
//!
//! | Tag | Variant          | Payload                          |
//! |-----|------------------|----------------------------------|
//! | `0` | `AddEvent`       | `[u8; 32]`                       |
//! | `1` | `AddEventsBulk`  | `Vec<[u8; 32]>`                  |
//! | `2` | `MetadataSet`    | `(String, BTreeMap<String, String>)` |
//! | `3` | `MetadataDelete` | `String`                         |

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use vellum_types::{CodecError, ErrorCode, Hash, decode, encode};

/// A command replicated through the consensus log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Append one event digest to the history tree.
    AddEvent {
        /// SHA-256 of the client event.
        digest: Hash,
    },
    /// Append several event digests, in order, in one transaction.
    AddEventsBulk {
        /// Event digests in insertion order.
        digests: Vec<Hash>,
    },
    /// Merge key/value pairs into a node's metadata.
    MetadataSet {
        /// Node the metadata belongs to.
        node_id: String,
        /// Pairs to insert or overwrite.
        kv: BTreeMap<String, String>,
    },
    /// Drop all metadata of a node.
    MetadataDelete {
        /// Node whose metadata is removed.
        node_id: String,
    },
}

/// Wire tag of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTag {
    /// [`Command::AddEvent`].
    AddEvent = 0,
    /// [`Command::AddEventsBulk`].
    AddEventsBulk = 1,
    /// [`Command::MetadataSet`].
    MetadataSet = 2,
    /// [`Command::MetadataDelete`].
    MetadataDelete = 3,
}

impl CommandTag {
    /// Parses a tag byte.
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::AddEvent),
            1 => Some(Self::AddEventsBulk),
            2 => Some(Self::MetadataSet),
            3 => Some(Self::MetadataDelete),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddEvent => "add_event",
            Self::AddEventsBulk => "add_events_bulk",
            Self::MetadataSet => "metadata_set",
            Self::MetadataDelete => "metadata_delete",
        }
    }
}

/// Errors from [`Command::decode`] and [`Command::encode`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    /// The command buffer had no tag byte.
    #[snafu(display("Empty command"))]
    Empty,

    /// The tag byte names no known command.
    #[snafu(display("Unknown command tag {tag}"))]
    UnknownTag {
        /// Tag byte found.
        tag: u8,
    },

    /// The payload did not match the tag's layout.
    #[snafu(display("Malformed {kind} payload: {source}"))]
    Payload {
        /// Command kind the tag announced.
        kind: &'static str,
        /// Underlying codec error.
        source: CodecError,
    },
}

impl CommandError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::StateMachineMalformedCommand
    }
}

impl Command {
    /// Wire tag of this command.
    pub const fn tag(&self) -> CommandTag {
        match self {
            Self::AddEvent { .. } => CommandTag::AddEvent,
            Self::AddEventsBulk { .. } => CommandTag::AddEventsBulk,
            Self::MetadataSet { .. } => CommandTag::MetadataSet,
            Self::MetadataDelete { .. } => CommandTag::MetadataDelete,
        }
    }

    /// Label used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        self.tag().as_str()
    }

    /// Whether applying the command touches the history tree.
    pub const fn is_tree_mutation(&self) -> bool {
        matches!(self, Self::AddEvent { .. } | Self::AddEventsBulk { .. })
    }

    /// Encodes the command as tag byte plus payload.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Payload` if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let kind = self.kind();
        let payload = match self {
            Self::AddEvent { digest } => encode(digest),
            Self::AddEventsBulk { digests } => encode(digests),
            Self::MetadataSet { node_id, kv } => encode(&(node_id, kv)),
            Self::MetadataDelete { node_id } => encode(node_id),
        }
        .context(PayloadSnafu { kind })?;

        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(self.tag() as u8);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decodes a command from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Empty` for an empty buffer,
    /// `CommandError::UnknownTag` for a tag outside `0..=3`, and
    /// `CommandError::Payload` when the payload does not decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, CommandError> {
        let Some((&tag_byte, payload)) = bytes.split_first() else {
            return EmptySnafu.fail();
        };
        let Some(tag) = CommandTag::from_u8(tag_byte) else {
            return UnknownTagSnafu { tag: tag_byte }.fail();
        };
        let kind = tag.as_str();

        let command = match tag {
            CommandTag::AddEvent => {
                Self::AddEvent { digest: decode(payload).context(PayloadSnafu { kind })? }
            },
            CommandTag::AddEventsBulk => {
                Self::AddEventsBulk { digests: decode(payload).context(PayloadSnafu { kind })? }
            },
            CommandTag::MetadataSet => {
                let (node_id, kv) = decode(payload).context(PayloadSnafu { kind })?;
                Self::MetadataSet { node_id, kv }
            },
            CommandTag::MetadataDelete => {
                Self::MetadataDelete { node_id: decode(payload).context(PayloadSnafu { kind })? }
            },
        };
        Ok(command)
    }
}
