//! redb storage engine wrapper.
//!
//! Provides a thin wrapper around a redb [`Database`] with:
//! - Database lifecycle management (create-or-open with a sized page cache)
//! - Write transactions that carry the configured commit durability
//! - Eager table creation so read transactions never see a missing table

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use redb::{Database, ReadTransaction, TableDefinition, TableHandle, WriteTransaction};
use snafu::ResultExt;
use vellum_types::config::Durability;

use crate::error::{CommitSnafu, OpenSnafu, Result, TableSnafu, TransactionSnafu};

/// Storage engine backed by a single redb file.
///
/// Cloning is cheap and shares the underlying database handle. The file
/// is released when the last clone is dropped.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Database>,
    durability: Durability,
    path: PathBuf,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .field("durability", &self.durability)
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the file cannot be created, is locked
    /// by another process, or is not a redb database.
    pub fn open(
        path: impl AsRef<Path>,
        cache_size_bytes: usize,
        durability: Durability,
    ) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::builder()
            .set_cache_size(cache_size_bytes)
            .create(path)
            .context(OpenSnafu { path: path.display().to_string() })?;

        if durability == Durability::Relaxed {
            tracing::warn!(
                path = %path.display(),
                "Opened store with relaxed durability; recent commits may be lost on crash"
            );
        }

        Ok(Self { db: Arc::new(db), durability, path: path.to_path_buf() })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit durability applied to every write transaction.
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Begins a write transaction with the configured durability.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transaction` if the transaction cannot start.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().context(TransactionSnafu)?;
        txn.set_durability(match self.durability {
            Durability::Immediate => redb::Durability::Immediate,
            Durability::Relaxed => redb::Durability::None,
        });
        Ok(txn)
    }

    /// Begins a read transaction over a consistent point-in-time view.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transaction` if the transaction cannot start.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        self.db.begin_read().context(TransactionSnafu)
    }

    /// Creates every listed byte-keyed table that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn ensure_tables(
        &self,
        tables: &[TableDefinition<'static, &'static [u8], &'static [u8]>],
    ) -> Result<()> {
        let txn = self.begin_write()?;
        for table in tables {
            txn.open_table(*table).context(TableSnafu)?;
            tracing::trace!(table = table.name(), "Ensured table");
        }
        txn.commit().context(CommitSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use redb::{ReadableTable, ReadableTableMetadata};
    use vellum_test_utils::TestDir;

    use super::*;

    const SCRATCH: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("scratch");

    #[test]
    fn test_open_creates_file() {
        let dir = TestDir::new();
        let path = dir.join("engine.redb");
        let engine = StorageEngine::open(&path, 1024 * 1024, Durability::Immediate).expect("open");
        assert!(path.exists());
        assert_eq!(engine.path(), path.as_path());
        assert_eq!(engine.durability(), Durability::Immediate);
    }

    #[test]
    fn test_write_and_read() {
        let dir = TestDir::new();
        let engine = StorageEngine::open(dir.join("engine.redb"), 1024 * 1024, Durability::Relaxed)
            .expect("open");
        engine.ensure_tables(&[SCRATCH]).expect("ensure tables");

        {
            let txn = engine.begin_write().expect("begin write");
            {
                let mut table = txn.open_table(SCRATCH).expect("open table");
                table.insert(b"key".as_slice(), b"value".as_slice()).expect("insert");
            }
            txn.commit().expect("commit");
        }

        let txn = engine.begin_read().expect("begin read");
        let table = txn.open_table(SCRATCH).expect("open table");
        let value = table.get(b"key".as_slice()).expect("get").expect("present");
        assert_eq!(value.value(), b"value");
    }

    #[test]
    fn test_ensure_tables_is_idempotent() {
        let dir = TestDir::new();
        let engine = StorageEngine::open(dir.join("engine.redb"), 1024 * 1024, Durability::Immediate)
            .expect("open");
        engine.ensure_tables(&[SCRATCH]).expect("first");
        engine.ensure_tables(&[SCRATCH]).expect("second");

        let txn = engine.begin_read().expect("begin read");
        let table = txn.open_table(SCRATCH).expect("table exists");
        assert_eq!(table.len().expect("len"), 0);
    }

    #[test]
    fn test_clones_share_database() {
        let dir = TestDir::new();
        let engine = StorageEngine::open(dir.join("engine.redb"), 1024 * 1024, Durability::Immediate)
            .expect("open");
        engine.ensure_tables(&[SCRATCH]).expect("ensure tables");
        let clone = engine.clone();

        {
            let txn = clone.begin_write().expect("begin write");
            {
                let mut table = txn.open_table(SCRATCH).expect("open table");
                table.insert(b"shared".as_slice(), b"yes".as_slice()).expect("insert");
            }
            txn.commit().expect("commit");
        }
        drop(clone);

        let txn = engine.begin_read().expect("begin read");
        let table = txn.open_table(SCRATCH).expect("open table");
        assert!(table.get(b"shared".as_slice()).expect("get").is_some());
    }
}
