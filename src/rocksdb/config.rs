//! Block cache configuration shared by all column families.

/// Configuration for the shared RocksDB block cache.
#[derive(Debug, Clone)]
pub struct BlockCacheConfig {
    /// Total block cache size in bytes.
    pub cache_size_bytes: usize,
    /// Block size for small, hot CFs (nodes, indices, abbreviations).
    pub default_block_size: usize,
    /// Block size for large-value CFs (edit log entries, node data).
    pub large_block_size: usize,
    /// Whether to cache index and filter blocks.
    pub cache_index_and_filter_blocks: bool,
    /// Whether to pin L0 filter and index blocks in cache.
    pub pin_l0_filter_and_index: bool,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: 128 * 1024 * 1024,
            default_block_size: 4 * 1024,
            large_block_size: 16 * 1024,
            cache_index_and_filter_blocks: true,
            pin_l0_filter_and_index: true,
        }
    }
}
