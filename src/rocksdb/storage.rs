//! Generic RocksDB storage parameterized by subsystem.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use rocksdb::{Options, TransactionDB, TransactionDBOptions, DB};

use super::config::BlockCacheConfig;
use super::handle::{DatabaseHandle, StorageMode, StorageOptions};
use super::subsystem::{DbAccess, StorageSubsystem};

// ============================================================================
// Storage<S>
// ============================================================================

/// Generic RocksDB storage parameterized by subsystem.
///
/// Provides the common storage lifecycle (open, block cache, close) while
/// delegating subsystem-specific behavior (column families, caches,
/// pre-warming) to the `StorageSubsystem` trait.
pub struct Storage<S: StorageSubsystem> {
    db_path: PathBuf,
    db_options: Options,
    txn_db_options: TransactionDBOptions,
    db: Option<DatabaseHandle>,
    mode: StorageMode,
    block_cache: Option<rocksdb::Cache>,
    block_cache_config: BlockCacheConfig,
    cache: Arc<S::Cache>,
    prewarm_config: S::PrewarmConfig,
    _marker: PhantomData<S>,
}

impl<S: StorageSubsystem> Storage<S> {
    /// Create a new Storage instance in read-only mode.
    ///
    /// Multiple read-only instances can access the same database at once.
    pub fn readonly(db_path: &Path) -> Self {
        Self {
            db_path: PathBuf::from(db_path),
            db_options: StorageOptions::default_for_readonly(),
            txn_db_options: TransactionDBOptions::default(),
            db: None,
            mode: StorageMode::ReadOnly,
            block_cache: None,
            block_cache_config: BlockCacheConfig::default(),
            cache: S::create_cache(),
            prewarm_config: S::PrewarmConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Create a new Storage instance in read-write mode.
    ///
    /// Only one read-write instance can access the database at a time.
    pub fn readwrite(db_path: &Path) -> Self {
        Self {
            db_path: PathBuf::from(db_path),
            db_options: StorageOptions::default_for_readwrite(),
            txn_db_options: TransactionDBOptions::default(),
            db: None,
            mode: StorageMode::ReadWrite,
            block_cache: None,
            block_cache_config: BlockCacheConfig::default(),
            cache: S::create_cache(),
            prewarm_config: S::PrewarmConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Set the pre-warm configuration. Must be called before `ready()`.
    pub fn with_prewarm_config(mut self, config: S::PrewarmConfig) -> Self {
        self.prewarm_config = config;
        self
    }

    /// Set the block cache configuration. Must be called before `ready()`.
    pub fn with_block_cache_config(mut self, config: BlockCacheConfig) -> Self {
        self.block_cache_config = config;
        self
    }

    /// Initialize the database and pre-warm the subsystem cache.
    #[tracing::instrument(skip(self), fields(subsystem = S::NAME, path = ?self.db_path))]
    pub fn ready(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }

        // The path must be a directory (or absent).
        match self.db_path.try_exists() {
            Err(e) => return Err(e.into()),
            Ok(true) => {
                if self.db_path.is_file() {
                    return Err(anyhow::anyhow!(
                        "Path is a file: {}",
                        self.db_path.display()
                    ));
                }
                if self.db_path.is_symlink() {
                    return Err(anyhow::anyhow!(
                        "Path is a symlink: {}",
                        self.db_path.display()
                    ));
                }
            }
            Ok(false) => {}
        }

        let cache = rocksdb::Cache::new_lru_cache(self.block_cache_config.cache_size_bytes);
        self.block_cache = Some(cache);
        let cache_ref = self.block_cache.as_ref().unwrap();

        let cf_descriptors = S::cf_descriptors(cache_ref, &self.block_cache_config);

        tracing::debug!(
            subsystem = S::NAME,
            cf_count = cf_descriptors.len(),
            "[{}] Built CF descriptors",
            S::NAME
        );

        match &self.mode {
            StorageMode::ReadOnly => {
                let db = DB::open_cf_descriptors_read_only(
                    &self.db_options,
                    &self.db_path,
                    cf_descriptors,
                    false,
                )?;
                self.db = Some(DatabaseHandle::ReadOnly(db));
            }
            StorageMode::ReadWrite => {
                let txn_db = TransactionDB::open_cf_descriptors(
                    &self.db_options,
                    &self.txn_db_options,
                    &self.db_path,
                    cf_descriptors,
                )?;
                self.db = Some(DatabaseHandle::ReadWrite(txn_db));
            }
        }

        let loaded = S::prewarm(self.db_access()?, &self.cache, &self.prewarm_config)?;
        tracing::info!(subsystem = S::NAME, loaded, "[{}] Ready", S::NAME);
        Ok(())
    }

    /// Get dynamic read access to the underlying database in either mode.
    pub fn db_access(&self) -> Result<&dyn DbAccess> {
        match &self.db {
            Some(DatabaseHandle::ReadOnly(db)) => Ok(db),
            Some(DatabaseHandle::ReadWrite(txn_db)) => Ok(txn_db),
            None => Err(anyhow::anyhow!("[{}] Storage is not ready", S::NAME)),
        }
    }

    /// Get a reference to the TransactionDB (only in readwrite mode).
    pub fn transaction_db(&self) -> Result<&TransactionDB> {
        self.db
            .as_ref()
            .and_then(|h| h.as_transaction_db())
            .ok_or_else(|| anyhow::anyhow!("[{}] Not in readwrite mode or not ready", S::NAME))
    }

    /// Check if storage is in readwrite mode with a TransactionDB.
    pub fn is_transactional(&self) -> bool {
        self.db
            .as_ref()
            .map(|h| h.is_read_write())
            .unwrap_or(false)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get the list of column family names for this subsystem.
    pub fn column_families(&self) -> &'static [&'static str] {
        S::COLUMN_FAMILIES
    }

    /// Get a reference to the subsystem's in-memory cache.
    pub fn cache(&self) -> &Arc<S::Cache> {
        &self.cache
    }

    /// Close the database.
    pub fn close(&mut self) -> Result<()> {
        if self.db.is_none() {
            return Err(anyhow::anyhow!("[{}] Storage is not ready", S::NAME));
        }
        if let Some(db_handle) = self.db.take() {
            drop(db_handle);
        }
        Ok(())
    }
}
