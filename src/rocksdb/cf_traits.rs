//! Column family trait definitions.
//!
//! - `ColumnFamily`: base marker trait with CF_NAME (single source of truth)
//! - `ColumnFamilyConfig<C>`: RocksDB options with a domain-specific config type
//! - `ColumnFamilySerde`: key/value serialization (MessagePack + LZ4 values)
//!
//! Keys always use direct byte concatenation with fixed-width big-endian
//! integers, never MessagePack: byte order must match value order so that
//! RocksDB range scans walk keys in the domain's natural order.

use anyhow::Result;
use rocksdb::{Cache, Options};
use serde::{Deserialize, Serialize};

use super::DbAccess;

// ============================================================================
// Base Trait: ColumnFamily
// ============================================================================

/// Base marker trait for column family types.
///
/// Provides the single source of truth for CF_NAME. All other CF traits
/// require this as a supertrait.
pub trait ColumnFamily {
    /// Column family name (with prefix, e.g. "layer/nodes").
    const CF_NAME: &'static str;
}

// ============================================================================
// Configuration Trait: ColumnFamilyConfig<C>
// ============================================================================

/// RocksDB configuration trait with a domain-specific config type.
pub trait ColumnFamilyConfig<C>: ColumnFamily {
    /// Create column family options with the shared block cache and config.
    fn cf_options(cache: &Cache, config: &C) -> Options;
}

// ============================================================================
// Serialization Trait: ColumnFamilySerde
// ============================================================================

/// Trait for column family serialization.
///
/// Values are serialized with MessagePack (self-describing, compact), then
/// compressed with LZ4. Keys are direct byte concatenation so prefix
/// extractors and range scans see constant-length, order-preserving prefixes.
pub trait ColumnFamilySerde: ColumnFamily {
    /// The key type for this column family.
    type Key: Serialize + for<'de> Deserialize<'de>;

    /// The value type for this column family.
    type Value: Serialize + for<'de> Deserialize<'de>;

    /// Serialize the key to bytes using direct concatenation.
    fn key_to_bytes(key: &Self::Key) -> Vec<u8>;

    /// Deserialize the key from bytes (direct format).
    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key>;

    /// Serialize the value with MessagePack, then compress with LZ4.
    fn value_to_bytes(value: &Self::Value) -> Result<Vec<u8>> {
        let msgpack_bytes = rmp_serde::to_vec(value)?;
        let compressed = lz4::block::compress(&msgpack_bytes, None, true)
            .map_err(|e| anyhow::anyhow!("LZ4 compression failed: {}", e))?;
        Ok(compressed)
    }

    /// Decompress with LZ4, then deserialize with MessagePack.
    fn value_from_bytes(bytes: &[u8]) -> Result<Self::Value> {
        let decompressed = lz4::block::decompress(bytes, None)
            .map_err(|e| anyhow::anyhow!("LZ4 decompression failed: {}", e))?;
        let value = rmp_serde::from_slice(&decompressed)?;
        Ok(value)
    }
}

// ============================================================================
// Prewarm Helper
// ============================================================================

/// Generic prewarm helper for `ColumnFamilySerde` CFs.
///
/// Iterates a column family, deserializing each record and calling the
/// visitor, up to `limit` records. Used to rebuild in-memory caches (the
/// abbreviation tables) from persisted state at startup.
pub fn prewarm_cf<CF, F>(db: &dyn DbAccess, limit: usize, mut visitor: F) -> Result<usize>
where
    CF: ColumnFamilySerde,
    F: FnMut(&CF::Key, &CF::Value) -> Result<()>,
{
    if limit == 0 {
        return Ok(0);
    }

    let iter = db.iterator_cf(CF::CF_NAME)?;
    let mut loaded = 0;

    for item in iter {
        if loaded >= limit {
            break;
        }

        let (key_bytes, value_bytes) = item?;

        let key = CF::key_from_bytes(&key_bytes)?;
        let value = CF::value_from_bytes(&value_bytes)?;
        visitor(&key, &value)?;
        loaded += 1;
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCf;

    impl ColumnFamily for TestCf {
        const CF_NAME: &'static str = "test/cf";
    }

    impl ColumnFamilySerde for TestCf {
        type Key = u64;
        type Value = String;

        fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
            key.to_be_bytes().to_vec()
        }

        fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
            if bytes.len() != 8 {
                anyhow::bail!("Invalid key length: expected 8, got {}", bytes.len());
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(u64::from_be_bytes(buf))
        }
    }

    #[test]
    fn test_column_family_cf_name() {
        assert_eq!(TestCf::CF_NAME, "test/cf");
    }

    #[test]
    fn test_value_roundtrip() {
        let value = "hello world".to_string();
        let bytes = TestCf::value_to_bytes(&value).unwrap();
        let recovered = TestCf::value_from_bytes(&bytes).unwrap();
        assert_eq!(value, recovered);
    }

    #[test]
    fn test_key_ordering_matches_value_ordering() {
        // Big-endian keys sort like their integer values.
        let a = TestCf::key_to_bytes(&1);
        let b = TestCf::key_to_bytes(&256);
        let c = TestCf::key_to_bytes(&u64::MAX);
        assert!(a < b);
        assert!(b < c);
    }
}
