//! StorageSubsystem trait and database access abstraction.

use std::sync::Arc;

use anyhow::Result;
use rocksdb::{Cache, ColumnFamilyDescriptor, TransactionDB, DB};

use super::config::BlockCacheConfig;

// ============================================================================
// DbAccess Trait
// ============================================================================

/// Abstraction over DB and TransactionDB for read operations.
///
/// Lets subsystem code (pre-warming, reads) work with both read-only and
/// read-write storage without knowing the concrete handle type.
pub trait DbAccess: Send + Sync {
    /// Get a value by key from a column family.
    fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Create an iterator over a column family, from the start.
    fn iterator_cf(
        &self,
        cf_name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>>;

    /// Create an iterator over a column family from the given key, in the
    /// given direction.
    fn iterator_cf_from(
        &self,
        cf_name: &str,
        from: &[u8],
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>>;
}

fn iter_mode(from: &[u8], reverse: bool) -> rocksdb::IteratorMode<'_> {
    if reverse {
        rocksdb::IteratorMode::From(from, rocksdb::Direction::Reverse)
    } else {
        rocksdb::IteratorMode::From(from, rocksdb::Direction::Forward)
    }
}

impl DbAccess for DB {
    fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = DB::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(DB::get_cf(self, cf, key)?)
    }

    fn iterator_cf(
        &self,
        cf_name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>> {
        let cf = DB::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(Box::new(
            DB::iterator_cf(self, cf, rocksdb::IteratorMode::Start)
                .map(|item| item.map_err(|e| anyhow::anyhow!("Iterator error: {}", e))),
        ))
    }

    fn iterator_cf_from(
        &self,
        cf_name: &str,
        from: &[u8],
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>> {
        let cf = DB::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(Box::new(
            DB::iterator_cf(self, cf, iter_mode(from, reverse))
                .map(|item| item.map_err(|e| anyhow::anyhow!("Iterator error: {}", e))),
        ))
    }
}

impl DbAccess for TransactionDB {
    fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = TransactionDB::<rocksdb::SingleThreaded>::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(TransactionDB::get_cf(self, cf, key)?)
    }

    fn iterator_cf(
        &self,
        cf_name: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>> {
        let cf = TransactionDB::<rocksdb::SingleThreaded>::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(Box::new(
            TransactionDB::iterator_cf(self, cf, rocksdb::IteratorMode::Start)
                .map(|item| item.map_err(|e| anyhow::anyhow!("Iterator error: {}", e))),
        ))
    }

    fn iterator_cf_from(
        &self,
        cf_name: &str,
        from: &[u8],
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_>> {
        let cf = TransactionDB::<rocksdb::SingleThreaded>::cf_handle(self, cf_name)
            .ok_or_else(|| anyhow::anyhow!("Column family not found: {}", cf_name))?;
        Ok(Box::new(
            TransactionDB::iterator_cf(self, cf, iter_mode(from, reverse))
                .map(|item| item.map_err(|e| anyhow::anyhow!("Iterator error: {}", e))),
        ))
    }
}

// ============================================================================
// StorageSubsystem Trait
// ============================================================================

/// Trait for a RocksDB storage subsystem.
///
/// Implementations define the column families, the in-memory cache type,
/// and the pre-warm logic that rebuilds that cache from persisted state on
/// startup.
pub trait StorageSubsystem: Send + Sync + 'static {
    /// Subsystem name for logging and identification.
    const NAME: &'static str;

    /// List of column family names managed by this subsystem.
    const COLUMN_FAMILIES: &'static [&'static str];

    /// Pre-warm configuration type.
    type PrewarmConfig: Default + Clone + Send + Sync;

    /// In-memory cache type rebuilt at startup.
    type Cache: Send + Sync;

    /// Create a new cache instance.
    fn create_cache() -> Arc<Self::Cache>;

    /// Build column family descriptors with the shared block cache.
    fn cf_descriptors(
        block_cache: &Cache,
        config: &BlockCacheConfig,
    ) -> Vec<ColumnFamilyDescriptor>;

    /// Pre-warm the cache from database contents.
    ///
    /// Returns the number of entries loaded.
    fn prewarm(
        db: &dyn DbAccess,
        cache: &Self::Cache,
        config: &Self::PrewarmConfig,
    ) -> Result<usize>;
}
