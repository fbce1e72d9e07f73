//! Database handle types for RocksDB storage.
//!
//! A layer database is opened either read-write (exclusive, transactional)
//! or read-only (any number of concurrent instances). The apply pipeline
//! requires the transactional handle; readers work against either.

use rocksdb::{Options, TransactionDB, DB};

// ============================================================================
// DatabaseHandle
// ============================================================================

/// Handle for either a read-only DB or a read-write TransactionDB.
pub enum DatabaseHandle {
    /// Read-only database access.
    ReadOnly(DB),
    /// Read-write access with transaction support.
    ReadWrite(TransactionDB),
}

impl DatabaseHandle {
    /// Get the TransactionDB reference if in ReadWrite mode.
    pub fn as_transaction_db(&self) -> Option<&TransactionDB> {
        match self {
            DatabaseHandle::ReadWrite(txn_db) => Some(txn_db),
            DatabaseHandle::ReadOnly(_) => None,
        }
    }

    /// Get the DB reference if in ReadOnly mode.
    pub fn as_db(&self) -> Option<&DB> {
        match self {
            DatabaseHandle::ReadOnly(db) => Some(db),
            DatabaseHandle::ReadWrite(_) => None,
        }
    }

    /// Check if this is a read-write handle with transaction support.
    pub fn is_read_write(&self) -> bool {
        matches!(self, DatabaseHandle::ReadWrite(_))
    }
}

// ============================================================================
// StorageMode
// ============================================================================

/// Storage access mode configuration.
pub enum StorageMode {
    /// Read-only access - multiple instances can open simultaneously.
    ReadOnly,
    /// Read-write access with an exclusive TransactionDB.
    ReadWrite,
}

// ============================================================================
// StorageOptions
// ============================================================================

/// Default RocksDB options factory for each storage mode.
pub struct StorageOptions;

impl StorageOptions {
    /// Default options for read-write mode.
    ///
    /// The layer's apply path is the only writer that can modify the store;
    /// missing databases and column families are created on open.
    pub fn default_for_readwrite() -> Options {
        let mut options = Options::default();
        options.set_error_if_exists(false);
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let num_cpus = std::thread::available_parallelism()
            .map(|p| p.get() as i32)
            .unwrap_or(4);
        options.increase_parallelism(num_cpus);
        options.set_max_background_jobs(num_cpus.min(8));

        options
    }

    /// Default options for read-only mode.
    ///
    /// The database must already exist; nothing is created.
    pub fn default_for_readonly() -> Options {
        let mut options = Options::default();
        options.set_error_if_exists(false);
        options.create_if_missing(false);
        options.create_missing_column_families(false);
        options
    }
}
