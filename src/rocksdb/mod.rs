//! Generic RocksDB storage infrastructure.
//!
//! The layer module defines WHAT is stored (column families, key layouts);
//! this module provides the HOW: database lifecycle, access modes, column
//! family traits, and serialization defaults shared by every CF.

mod cf_traits;
mod config;
mod handle;
mod storage;
mod subsystem;

pub use cf_traits::{prewarm_cf, ColumnFamily, ColumnFamilyConfig, ColumnFamilySerde};
pub use config::BlockCacheConfig;
pub use handle::{DatabaseHandle, StorageMode, StorageOptions};
pub use storage::Storage;
pub use subsystem::{DbAccess, StorageSubsystem};
