//! Snapshot streams with zstd compression and SHA-256 integrity.
//!
//! ## Stream format
//!
//! Everything from the header through the last table section is wrapped in
//! one zstd stream. The checksum covers the **compressed** bytes and is
//! appended after the zstd stream is finalized, so a corrupt stream is
//! rejected before any decompression.
//!
//! ```text
//! [header]
//!   magic: [u8; 4]            = b"VSNP"
//!   version: u8               = 1
//!   flags: u8                 = 0 (reserved)
//!   state_len: u32le
//!   state: [u8; state_len]    = postcard(FsmState)
//!   metadata_len: u32le
//!   metadata: [u8; metadata_len] = postcard(MetadataMap)
//!
//! [table_sections]
//!   table_count: u32le
//!   for each table:
//!     table_id: u8
//!     entry_count: u64le
//!     for each entry:
//!       key_len: u32le
//!       key: [u8; key_len]
//!       value_len: u32le
//!       value: [u8; value_len]
//!
//! [footer]
//!   checksum: [u8; 32]        = SHA-256 of all compressed bytes
//! ```

use std::{
    io::{self, Read, Write},
    sync::Arc,
    time::Instant,
};

use redb::{ReadTransaction, ReadableTable, ReadableTableMetadata, WriteTransaction};
use sha2::{Digest, Sha256};
use snafu::{Location, ResultExt, Snafu, ensure};
use vellum_state::TableId;
use vellum_store::{StorageSnafu, StoreError, TableSnafu};
use vellum_types::{CodecError, ErrorCode, Hash, MetricsSink, decode, encode, hash_eq};

use crate::{metadata::MetadataMap, state::FsmState};

/// Snapshot stream magic bytes.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"VSNP";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Size of the SHA-256 checksum footer.
pub const CHECKSUM_SIZE: usize = 32;

/// Largest accepted section, key or value: 64 MiB.
pub const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while writing or reading a snapshot stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SnapshotError {
    /// I/O error on the underlying reader or writer.
    #[snafu(display("Snapshot I/O error at {location}: {source}"))]
    Io {
        /// Underlying I/O error.
        source: io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The stream does not start with the snapshot magic.
    #[snafu(display("Invalid snapshot magic: expected VSNP, got {found:?}"))]
    BadMagic {
        /// Bytes found instead.
        found: [u8; 4],
    },

    /// The stream was written by a newer format.
    #[snafu(display("Unsupported snapshot version: {version} (expected <= {SNAPSHOT_VERSION})"))]
    UnsupportedVersion {
        /// Version byte found.
        version: u8,
    },

    /// The compressed bytes do not match the footer.
    #[snafu(display("Snapshot checksum mismatch: expected {expected}, got {actual}"))]
    ChecksumMismatch {
        /// Checksum carried by the footer, hex.
        expected: String,
        /// Checksum of the bytes received, hex.
        actual: String,
    },

    /// The stream ended early.
    #[snafu(display("Snapshot truncated: {reason}"))]
    Truncated {
        /// What was being read.
        reason: String,
    },

    /// A table section names an unknown table.
    #[snafu(display("Unknown table ID in snapshot: {table_id}"))]
    UnknownTableId {
        /// Table id found.
        table_id: u8,
    },

    /// A section failed to encode or decode.
    #[snafu(display("Snapshot codec error at {location}: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The stream is well-formed but its content is impossible.
    #[snafu(display("Invalid snapshot entry: {reason}"))]
    InvalidEntry {
        /// What is wrong.
        reason: String,
    },

    /// Reading the snapshotted tables or installing them failed.
    #[snafu(display("Snapshot store error: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
    },
}

impl SnapshotError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::AppIo,
            Self::ChecksumMismatch { .. } => ErrorCode::StorageCorruption,
            Self::Codec { source, .. } => source.code(),
            Self::Store { source } => source.code(),
            Self::BadMagic { .. }
            | Self::UnsupportedVersion { .. }
            | Self::Truncated { .. }
            | Self::UnknownTableId { .. }
            | Self::InvalidEntry { .. } => ErrorCode::StorageSnapshot,
        }
    }
}

// ============================================================================
// HashingWriter
// ============================================================================

/// Wraps a writer and hashes every byte that passes through it.
///
/// Placed between the zstd encoder and the destination, it hashes the
/// compressed bytes.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W> HashingWriter<W> {
    /// Creates a new `HashingWriter` wrapping `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new(), written: 0 }
    }

    /// Consumes the writer, returning the inner writer, the digest and the
    /// number of bytes written.
    pub fn finalize(self) -> (W, Hash, u64) {
        (self.inner, self.hasher.finalize().into(), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// SnapshotWriter
// ============================================================================

/// Writes the stream format.
///
/// The pipeline is: sections → zstd encoder → [`HashingWriter`] → destination.
/// Call [`finish`](Self::finish) to finalize the zstd frame and append the
/// checksum.
pub struct SnapshotWriter<W: Write> {
    encoder: zstd::Encoder<'static, HashingWriter<W>>,
}

impl<W: Write> SnapshotWriter<W> {
    /// Starts a stream at the given zstd level.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Io` if the encoder cannot be created.
    pub fn new(writer: W, level: i32) -> Result<Self, SnapshotError> {
        let encoder = zstd::Encoder::new(HashingWriter::new(writer), level).context(IoSnafu)?;
        Ok(Self { encoder })
    }

    /// Writes magic, version, flags and the two header sections.
    ///
    /// # Errors
    ///
    /// Returns an error if a section is too large or the write fails.
    pub fn write_header(
        &mut self,
        state_bytes: &[u8],
        metadata_bytes: &[u8],
    ) -> Result<(), SnapshotError> {
        self.encoder.write_all(SNAPSHOT_MAGIC).context(IoSnafu)?;
        self.encoder.write_all(&[SNAPSHOT_VERSION, 0]).context(IoSnafu)?;
        self.write_field(state_bytes, "state")?;
        self.write_field(metadata_bytes, "metadata")
    }

    /// Writes the number of table sections that follow.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Io` if the write fails.
    pub fn write_table_count(&mut self, count: u32) -> Result<(), SnapshotError> {
        self.encoder.write_all(&count.to_le_bytes()).context(IoSnafu)
    }

    /// Writes a table section header.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Io` if the write fails.
    pub fn write_table_header(
        &mut self,
        table: TableId,
        entry_count: u64,
    ) -> Result<(), SnapshotError> {
        self.encoder.write_all(&[table.id()]).context(IoSnafu)?;
        self.encoder.write_all(&entry_count.to_le_bytes()).context(IoSnafu)
    }

    /// Writes one table entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value is too large or the write fails.
    pub fn write_table_entry(&mut self, key: &[u8], value: &[u8]) -> Result<(), SnapshotError> {
        self.write_field(key, "key")?;
        self.write_field(value, "value")
    }

    /// Finalizes the zstd frame and writes the checksum footer.
    ///
    /// Returns the destination and the total number of bytes written to it.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError::Io` if flushing fails.
    pub fn finish(self) -> Result<(W, u64), SnapshotError> {
        let hashing = self.encoder.finish().context(IoSnafu)?;
        let (mut inner, checksum, written) = hashing.finalize();
        inner.write_all(&checksum).context(IoSnafu)?;
        inner.flush().context(IoSnafu)?;
        Ok((inner, written + CHECKSUM_SIZE as u64))
    }

    fn write_field(&mut self, bytes: &[u8], what: &str) -> Result<(), SnapshotError> {
        ensure!(
            bytes.len() <= MAX_FIELD_LEN,
            InvalidEntrySnafu { reason: format!("{what} too large: {} bytes", bytes.len()) }
        );
        let len = bytes.len() as u32;
        self.encoder.write_all(&len.to_le_bytes()).context(IoSnafu)?;
        self.encoder.write_all(bytes).context(IoSnafu)
    }
}

// ============================================================================
// FsmSnapshot
// ============================================================================

/// A point-in-time view of the state machine, ready to be persisted.
///
/// Holds a redb read transaction, so applies that happen after the snapshot
/// was taken are invisible to it.
pub struct FsmSnapshot {
    txn: ReadTransaction,
    state: FsmState,
    metadata: Vec<u8>,
    level: i32,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for FsmSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmSnapshot")
            .field("state", &self.state)
            .field("metadata_len", &self.metadata.len())
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl FsmSnapshot {
    pub(crate) fn new(
        txn: ReadTransaction,
        state: FsmState,
        metadata: &MetadataMap,
        level: i32,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, SnapshotError> {
        let metadata = encode(metadata).context(CodecSnafu)?;
        Ok(Self { txn, state, metadata, level, metrics })
    }

    /// Applied state captured by the snapshot.
    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Streams the snapshot into `writer`.
    ///
    /// Returns the writer and the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be read or the write fails.
    pub fn persist<W: Write>(&self, writer: W) -> Result<(W, u64), SnapshotError> {
        let start = Instant::now();
        let result = self.write_stream(writer);
        let latency = start.elapsed().as_secs_f64();
        match &result {
            Ok((_, size)) => {
                self.metrics.record_snapshot(true, *size, latency);
                tracing::info!(
                    index = self.state.index,
                    balloon_version = self.state.balloon_version,
                    size_bytes = size,
                    "Persisted snapshot"
                );
            },
            Err(e) => {
                self.metrics.record_snapshot(false, 0, latency);
                tracing::warn!(error = %e, "Failed to persist snapshot");
            },
        }
        result
    }

    fn write_stream<W: Write>(&self, writer: W) -> Result<(W, u64), SnapshotError> {
        let state_bytes = encode(&self.state).context(CodecSnafu)?;
        let mut out = SnapshotWriter::new(writer, self.level)?;
        out.write_header(&state_bytes, &self.metadata)?;
        out.write_table_count(TableId::SNAPSHOT.len() as u32)?;

        for table_id in TableId::SNAPSHOT {
            let table = self
                .txn
                .open_table(table_id.definition())
                .context(TableSnafu)
                .context(StoreSnafu)?;
            let count = table.len().context(StorageSnafu).context(StoreSnafu)?;
            out.write_table_header(table_id, count)?;
            for entry in table.iter().context(StorageSnafu).context(StoreSnafu)? {
                let (key, value) = entry.context(StorageSnafu).context(StoreSnafu)?;
                out.write_table_entry(key.value(), value.value())?;
            }
        }

        out.finish()
    }
}

// ============================================================================
// SnapshotImage
// ============================================================================

/// Entries of one snapshotted table.
pub type TableEntries = Vec<(Vec<u8>, Vec<u8>)>;

/// A fully read and validated snapshot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotImage {
    /// Applied state as transmitted. Restore recomputes the version rather
    /// than trusting it.
    pub state: FsmState,
    /// Metadata map.
    pub metadata: MetadataMap,
    /// Table contents, in stream order.
    pub tables: Vec<(TableId, TableEntries)>,
}

impl SnapshotImage {
    /// Reads a whole stream, verifying the checksum before decompressing.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated, fails its checksum, or
    /// carries malformed sections.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, SnapshotError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).context(IoSnafu)?;
        ensure!(
            bytes.len() >= CHECKSUM_SIZE,
            TruncatedSnafu {
                reason: format!(
                    "stream too small for checksum: {} bytes (minimum {CHECKSUM_SIZE})",
                    bytes.len()
                )
            }
        );

        let (compressed, footer) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        let mut expected = [0u8; CHECKSUM_SIZE];
        expected.copy_from_slice(footer);
        let actual: Hash = Sha256::digest(compressed).into();
        ensure!(
            hash_eq(&expected, &actual),
            ChecksumMismatchSnafu { expected: hex::encode(expected), actual: hex::encode(actual) }
        );

        let mut decoder = zstd::Decoder::new(compressed).context(IoSnafu)?;
        let image = Self::parse(&mut decoder)?;

        let mut trailing = [0u8; 1];
        let extra = decoder.read(&mut trailing).context(IoSnafu)?;
        ensure!(extra == 0, InvalidEntrySnafu { reason: "trailing bytes after last table" });
        Ok(image)
    }

    fn parse<R: Read>(reader: &mut R) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 4];
        read_exact_or_truncated(reader, &mut magic, "magic bytes")?;
        ensure!(&magic == SNAPSHOT_MAGIC, BadMagicSnafu { found: magic });

        let mut version_flags = [0u8; 2];
        read_exact_or_truncated(reader, &mut version_flags, "version")?;
        let version = version_flags[0];
        ensure!(version <= SNAPSHOT_VERSION, UnsupportedVersionSnafu { version });

        let state_bytes = read_field(reader, "state")?;
        let state: FsmState = decode(&state_bytes).context(CodecSnafu)?;
        let metadata_bytes = read_field(reader, "metadata")?;
        let metadata: MetadataMap = decode(&metadata_bytes).context(CodecSnafu)?;

        let table_count = read_u32(reader, "table count")?;
        let mut tables: Vec<(TableId, TableEntries)> = Vec::new();
        for _ in 0..table_count {
            let mut id = [0u8; 1];
            read_exact_or_truncated(reader, &mut id, "table id")?;
            let table_id = id[0];
            let table =
                TableId::from_id(table_id).ok_or(SnapshotError::UnknownTableId { table_id })?;
            ensure!(
                TableId::SNAPSHOT.contains(&table),
                InvalidEntrySnafu { reason: format!("table {table_id} is not snapshotted") }
            );
            ensure!(
                tables.iter().all(|(seen, _)| *seen != table),
                InvalidEntrySnafu { reason: format!("duplicate table {table_id}") }
            );

            let entry_count = read_u64(reader, "entry count")?;
            let mut entries = Vec::new();
            for _ in 0..entry_count {
                let key = read_field(reader, "key")?;
                let value = read_field(reader, "value")?;
                check_entry(table, &key, &value)?;
                entries.push((key, value));
            }
            tables.push((table, entries));
        }

        Ok(Self { state, metadata, tables })
    }

    /// Number of event digests carried by the image.
    pub fn event_count(&self) -> usize {
        self.entries(TableId::HistoryEvents).map_or(0, <[_]>::len)
    }

    /// Entries of `table`, if the image carries it.
    pub fn entries(&self, table: TableId) -> Option<&[(Vec<u8>, Vec<u8>)]> {
        self.tables.iter().find(|(id, _)| *id == table).map(|(_, entries)| entries.as_slice())
    }

    /// Replaces every snapshotted table with the image's contents.
    ///
    /// Tables the image does not carry end up empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be cleared or written.
    pub fn install(&self, txn: &WriteTransaction) -> vellum_store::Result<()> {
        for table_id in TableId::SNAPSHOT {
            let definition = table_id.definition();
            txn.delete_table(definition).context(TableSnafu)?;
            let mut table = txn.open_table(definition).context(TableSnafu)?;
            for (key, value) in self.entries(table_id).unwrap_or_default() {
                table.insert(key.as_slice(), value.as_slice()).context(StorageSnafu)?;
            }
        }
        Ok(())
    }
}

fn check_entry(table: TableId, key: &[u8], value: &[u8]) -> Result<(), SnapshotError> {
    let (key_len, value_len) = match table {
        TableId::HistoryEvents => (Some(8), Some(32)),
        TableId::HistoryFrozen => (Some(16), Some(32)),
        TableId::VersionIndex => (Some(32), Some(8)),
        TableId::PeerMeta | TableId::FsmState => (None, None),
    };
    let key_ok = key_len.is_none_or(|len| key.len() == len);
    let value_ok = value_len.is_none_or(|len| value.len() == len);
    ensure!(
        key_ok && value_ok,
        InvalidEntrySnafu {
            reason: format!(
                "{table:?} entry has {}-byte key and {}-byte value",
                key.len(),
                value.len()
            )
        }
    );
    Ok(())
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), SnapshotError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            TruncatedSnafu { reason: format!("unexpected end of stream reading {what}") }.fail()
        },
        Err(e) => Err(e).context(IoSnafu),
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32, SnapshotError> {
    let mut buf = [0u8; 4];
    read_exact_or_truncated(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64, SnapshotError> {
    let mut buf = [0u8; 8];
    read_exact_or_truncated(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_field<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>, SnapshotError> {
    let len = read_u32(reader, what)? as usize;
    ensure!(
        len <= MAX_FIELD_LEN,
        InvalidEntrySnafu { reason: format!("{what} length {len} exceeds {MAX_FIELD_LEN}") }
    );
    let mut buf = vec![0u8; len];
    read_exact_or_truncated(reader, &mut buf, what)?;
    Ok(buf)
}
