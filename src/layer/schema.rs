//! Column family definitions for the layer subsystem.
//!
//! All layer CFs use the `layer/` prefix. Naming convention per entity `Foo`:
//! a unit struct `Foos` marking the CF, `FooCfKey` (always a tuple, direct
//! byte serialization for prefix extraction), and `FooCfValue` (MessagePack +
//! LZ4 via the `ColumnFamilySerde` defaults).
//!
//! Key layouts put all fixed-width fields first; at most one variable-length
//! field is allowed and it must come last.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::abbrev::{AbbrevTable, Abrv};
use super::edit::{EditMeta, NodeEdit};
use super::stortype::{IndxOrd, Valu};
use crate::rocksdb::{
    prewarm_cf, BlockCacheConfig, ColumnFamily, ColumnFamilyConfig, ColumnFamilySerde,
    DbAccess, StorageSubsystem,
};
use crate::{Buid, SourceId, TimestampMilli};

// ============================================================================
// Shared CF option builders
// ============================================================================

fn point_lookup_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
    let mut opts = rocksdb::Options::default();
    let mut block_opts = rocksdb::BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_block_size(config.default_block_size);
    if config.cache_index_and_filter_blocks {
        block_opts.set_cache_index_and_filter_blocks(true);
    }
    if config.pin_l0_filter_and_index {
        block_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);
    }
    block_opts.set_bloom_filter(10.0, false);
    opts.set_block_based_table_factory(&block_opts);
    opts
}

fn range_scan_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
    // No bloom filter: these CFs are read by iteration, not point gets.
    let mut opts = rocksdb::Options::default();
    let mut block_opts = rocksdb::BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_block_size(config.large_block_size);
    if config.cache_index_and_filter_blocks {
        block_opts.set_cache_index_and_filter_blocks(true);
    }
    opts.set_block_based_table_factory(&block_opts);
    opts
}

fn fixed_prefix(bytes: &[u8], len: usize, what: &str) -> Result<()> {
    if bytes.len() < len {
        anyhow::bail!(
            "Invalid {} key: expected at least {} bytes, got {}",
            what,
            len,
            bytes.len()
        );
    }
    Ok(())
}

// ============================================================================
// Nodes Column Family
// ============================================================================

/// Primary node record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) form: String,
    /// The primary value the buid was derived from.
    pub(crate) valu: Valu,
    /// Property values by name, `.created` included.
    pub(crate) props: BTreeMap<String, Valu>,
}

pub(crate) struct Nodes;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct NodeCfKey(pub(crate) Buid);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct NodeCfValue(pub(crate) Node);

impl ColumnFamily for Nodes {
    const CF_NAME: &'static str = "layer/nodes";
}

impl ColumnFamilyConfig<BlockCacheConfig> for Nodes {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for Nodes {
    type Key = NodeCfKey;
    type Value = NodeCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.as_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        Ok(NodeCfKey(Buid::from_slice(bytes)?))
    }
}

// ============================================================================
// ByProps Column Family (secondary index)
// ============================================================================

/// Secondary index over property values.
///
/// Key: prop abbreviation (4) + ordering tag (1) + value key bytes
/// (variable) + buid (16). The buid is last so all nodes sharing a value are
/// adjacent; it is recovered by fixed-width slicing from the end.
pub(crate) struct ByProps;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ByPropCfKey(
    pub(crate) Abrv,
    pub(crate) IndxOrd,
    pub(crate) Vec<u8>,
    pub(crate) Buid,
);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ByPropCfValue(pub(crate) ());

impl ColumnFamily for ByProps {
    const CF_NAME: &'static str = "layer/byprop";
}

impl ColumnFamilyConfig<BlockCacheConfig> for ByProps {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        range_scan_options(cache, config)
    }
}

impl ColumnFamilySerde for ByProps {
    type Key = ByPropCfKey;
    type Value = ByPropCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Abrv::SIZE + 1 + key.2.len() + Buid::SIZE);
        bytes.extend_from_slice(&key.0.to_be_bytes());
        bytes.push(key.1.tag());
        bytes.extend_from_slice(&key.2);
        bytes.extend_from_slice(key.3.as_bytes());
        bytes
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        fixed_prefix(bytes, Abrv::SIZE + 1 + Buid::SIZE, "ByProp")?;
        let mut abrv = [0u8; 4];
        abrv.copy_from_slice(&bytes[0..4]);
        let ord = indx_ord_from_tag(bytes[4])?;
        let split = bytes.len() - Buid::SIZE;
        let valu_key = bytes[5..split].to_vec();
        let buid = Buid::from_slice(&bytes[split..])?;
        Ok(ByPropCfKey(Abrv::from_be_bytes(abrv), ord, valu_key, buid))
    }
}

fn indx_ord_from_tag(tag: u8) -> Result<IndxOrd> {
    match tag {
        0x00 => Ok(IndxOrd::Main),
        0x01 => Ok(IndxOrd::IvalStart),
        0x02 => Ok(IndxOrd::IvalEnd),
        other => anyhow::bail!("Invalid index ordering tag: {:#04x}", other),
    }
}

/// The prop-abbreviation + ordering prefix every key under one index shares.
pub(crate) fn byprop_prefix(abrv: Abrv, ord: IndxOrd) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(Abrv::SIZE + 1);
    prefix.extend_from_slice(&abrv.to_be_bytes());
    prefix.push(ord.tag());
    prefix
}

// ============================================================================
// Tags Column Family
// ============================================================================

pub(crate) struct Tags;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TagCfKey(pub(crate) Buid, pub(crate) String);

/// Optional tag interval value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct TagCfValue(pub(crate) Option<(TimestampMilli, TimestampMilli)>);

impl ColumnFamily for Tags {
    const CF_NAME: &'static str = "layer/tags";
}

impl ColumnFamilyConfig<BlockCacheConfig> for Tags {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for Tags {
    type Key = TagCfKey;
    type Value = TagCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Buid::SIZE + key.1.len());
        bytes.extend_from_slice(key.0.as_bytes());
        bytes.extend_from_slice(key.1.as_bytes());
        bytes
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        fixed_prefix(bytes, Buid::SIZE, "Tag")?;
        let buid = Buid::from_slice(&bytes[..Buid::SIZE])?;
        let tag = std::str::from_utf8(&bytes[Buid::SIZE..])?.to_string();
        Ok(TagCfKey(buid, tag))
    }
}

// ============================================================================
// TagProps Column Family
// ============================================================================

/// Tag-scoped property values. Tag-prop names are abbreviated (they repeat
/// across many tags); the tag itself is the trailing variable field.
pub(crate) struct TagProps;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TagPropCfKey(
    pub(crate) Buid,
    pub(crate) Abrv,
    pub(crate) String,
);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TagPropCfValue(pub(crate) Valu);

impl ColumnFamily for TagProps {
    const CF_NAME: &'static str = "layer/tagprops";
}

impl ColumnFamilyConfig<BlockCacheConfig> for TagProps {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for TagProps {
    type Key = TagPropCfKey;
    type Value = TagPropCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Buid::SIZE + Abrv::SIZE + key.2.len());
        bytes.extend_from_slice(key.0.as_bytes());
        bytes.extend_from_slice(&key.1.to_be_bytes());
        bytes.extend_from_slice(key.2.as_bytes());
        bytes
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        fixed_prefix(bytes, Buid::SIZE + Abrv::SIZE, "TagProp")?;
        let buid = Buid::from_slice(&bytes[..Buid::SIZE])?;
        let mut abrv = [0u8; 4];
        abrv.copy_from_slice(&bytes[Buid::SIZE..Buid::SIZE + Abrv::SIZE]);
        let tag = std::str::from_utf8(&bytes[Buid::SIZE + Abrv::SIZE..])?.to_string();
        Ok(TagPropCfKey(buid, Abrv::from_be_bytes(abrv), tag))
    }
}

// ============================================================================
// Edge Column Families (forward + reverse)
// ============================================================================

/// Edges keyed by source: src (16) + verb abbreviation (4) + dst (16).
pub(crate) struct FwdEdges;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct FwdEdgeCfKey(pub(crate) Buid, pub(crate) Abrv, pub(crate) Buid);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct FwdEdgeCfValue(pub(crate) ());

impl ColumnFamily for FwdEdges {
    const CF_NAME: &'static str = "layer/fwd_edges";
}

impl ColumnFamilyConfig<BlockCacheConfig> for FwdEdges {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        range_scan_options(cache, config)
    }
}

impl ColumnFamilySerde for FwdEdges {
    type Key = FwdEdgeCfKey;
    type Value = FwdEdgeCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        edge_key_to_bytes(&key.0, key.1, &key.2)
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        let (a, abrv, b) = edge_key_from_bytes(bytes)?;
        Ok(FwdEdgeCfKey(a, abrv, b))
    }
}

/// Mirror of FwdEdges keyed by destination: dst (16) + verb (4) + src (16).
pub(crate) struct RevEdges;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct RevEdgeCfKey(pub(crate) Buid, pub(crate) Abrv, pub(crate) Buid);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct RevEdgeCfValue(pub(crate) ());

impl ColumnFamily for RevEdges {
    const CF_NAME: &'static str = "layer/rev_edges";
}

impl ColumnFamilyConfig<BlockCacheConfig> for RevEdges {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        range_scan_options(cache, config)
    }
}

impl ColumnFamilySerde for RevEdges {
    type Key = RevEdgeCfKey;
    type Value = RevEdgeCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        edge_key_to_bytes(&key.0, key.1, &key.2)
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        let (a, abrv, b) = edge_key_from_bytes(bytes)?;
        Ok(RevEdgeCfKey(a, abrv, b))
    }
}

fn edge_key_to_bytes(a: &Buid, abrv: Abrv, b: &Buid) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(Buid::SIZE * 2 + Abrv::SIZE);
    bytes.extend_from_slice(a.as_bytes());
    bytes.extend_from_slice(&abrv.to_be_bytes());
    bytes.extend_from_slice(b.as_bytes());
    bytes
}

fn edge_key_from_bytes(bytes: &[u8]) -> Result<(Buid, Abrv, Buid)> {
    if bytes.len() != Buid::SIZE * 2 + Abrv::SIZE {
        anyhow::bail!(
            "Invalid edge key length: expected {}, got {}",
            Buid::SIZE * 2 + Abrv::SIZE,
            bytes.len()
        );
    }
    let a = Buid::from_slice(&bytes[..Buid::SIZE])?;
    let mut abrv = [0u8; 4];
    abrv.copy_from_slice(&bytes[Buid::SIZE..Buid::SIZE + Abrv::SIZE]);
    let b = Buid::from_slice(&bytes[Buid::SIZE + Abrv::SIZE..])?;
    Ok((a, Abrv::from_be_bytes(abrv), b))
}

// ============================================================================
// NodeData Column Family
// ============================================================================

/// Opaque named blobs attached to nodes. Not indexed, not spliced.
pub(crate) struct NodeDatas;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct NodeDataCfKey(pub(crate) Buid, pub(crate) String);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct NodeDataCfValue(pub(crate) Vec<u8>);

impl ColumnFamily for NodeDatas {
    const CF_NAME: &'static str = "layer/nodedata";
}

impl ColumnFamilyConfig<BlockCacheConfig> for NodeDatas {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for NodeDatas {
    type Key = NodeDataCfKey;
    type Value = NodeDataCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Buid::SIZE + key.1.len());
        bytes.extend_from_slice(key.0.as_bytes());
        bytes.extend_from_slice(key.1.as_bytes());
        bytes
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        fixed_prefix(bytes, Buid::SIZE, "NodeData")?;
        let buid = Buid::from_slice(&bytes[..Buid::SIZE])?;
        let name = std::str::from_utf8(&bytes[Buid::SIZE..])?.to_string();
        Ok(NodeDataCfKey(buid, name))
    }
}

// ============================================================================
// Abbreviation Column Families
// ============================================================================

/// Persisted property-name abbreviations (id → name).
pub(crate) struct Abbrevs;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct AbbrevCfKey(pub(crate) Abrv);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct AbbrevCfValue(pub(crate) String);

impl ColumnFamily for Abbrevs {
    const CF_NAME: &'static str = "layer/abbrevs";
}

impl ColumnFamilyConfig<BlockCacheConfig> for Abbrevs {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for Abbrevs {
    type Key = AbbrevCfKey;
    type Value = AbbrevCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.to_be_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        if bytes.len() != Abrv::SIZE {
            anyhow::bail!(
                "Invalid Abbrev key length: expected {}, got {}",
                Abrv::SIZE,
                bytes.len()
            );
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(AbbrevCfKey(Abrv::from_be_bytes(buf)))
    }
}

/// Persisted tag-property-name abbreviations. Separate id space from Abbrevs.
pub(crate) struct TagAbrvs;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TagAbrvCfKey(pub(crate) Abrv);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TagAbrvCfValue(pub(crate) String);

impl ColumnFamily for TagAbrvs {
    const CF_NAME: &'static str = "layer/tagabrvs";
}

impl ColumnFamilyConfig<BlockCacheConfig> for TagAbrvs {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for TagAbrvs {
    type Key = TagAbrvCfKey;
    type Value = TagAbrvCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.to_be_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        if bytes.len() != Abrv::SIZE {
            anyhow::bail!(
                "Invalid TagAbrv key length: expected {}, got {}",
                Abrv::SIZE,
                bytes.len()
            );
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(TagAbrvCfKey(Abrv::from_be_bytes(buf)))
    }
}

// ============================================================================
// EditLog Column Family
// ============================================================================

/// The append-only edit log, keyed by offset. Big-endian offsets make
/// forward iteration replay order and reverse iteration find the tail.
pub(crate) struct EditLogs;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct EditLogCfKey(pub(crate) u64);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct EditLogCfValue(pub(crate) Vec<NodeEdit>, pub(crate) EditMeta);

impl ColumnFamily for EditLogs {
    const CF_NAME: &'static str = "layer/editlog";
}

impl ColumnFamilyConfig<BlockCacheConfig> for EditLogs {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        range_scan_options(cache, config)
    }
}

impl ColumnFamilySerde for EditLogs {
    type Key = EditLogCfKey;
    type Value = EditLogCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.to_be_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        if bytes.len() != 8 {
            anyhow::bail!(
                "Invalid EditLog key length: expected 8, got {}",
                bytes.len()
            );
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(EditLogCfKey(u64::from_be_bytes(buf)))
    }
}

// ============================================================================
// Cursors Column Family
// ============================================================================

/// Durable per-source replication cursors: the next upstream offset to pull.
pub(crate) struct Cursors;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct CursorCfKey(pub(crate) SourceId);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct CursorCfValue(pub(crate) u64);

impl ColumnFamily for Cursors {
    const CF_NAME: &'static str = "layer/cursors";
}

impl ColumnFamilyConfig<BlockCacheConfig> for Cursors {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for Cursors {
    type Key = CursorCfKey;
    type Value = CursorCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.as_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        Ok(CursorCfKey(SourceId::from_slice(bytes)?))
    }
}

// ============================================================================
// Meta Column Family
// ============================================================================

/// Small named scalars: model version, the canrev flag.
pub(crate) struct Metas;

pub(crate) const META_VERSION: &str = "version";
pub(crate) const META_CANREV: &str = "canrev";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct MetaCfKey(pub(crate) String);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct MetaCfValue(pub(crate) u64);

impl ColumnFamily for Metas {
    const CF_NAME: &'static str = "layer/meta";
}

impl ColumnFamilyConfig<BlockCacheConfig> for Metas {
    fn cf_options(cache: &rocksdb::Cache, config: &BlockCacheConfig) -> rocksdb::Options {
        point_lookup_options(cache, config)
    }
}

impl ColumnFamilySerde for Metas {
    type Key = MetaCfKey;
    type Value = MetaCfValue;

    fn key_to_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.as_bytes().to_vec()
    }

    fn key_from_bytes(bytes: &[u8]) -> Result<Self::Key> {
        Ok(MetaCfKey(std::str::from_utf8(bytes)?.to_string()))
    }
}

// ============================================================================
// LayerSubsystem
// ============================================================================

/// In-memory caches rebuilt at startup: the two abbreviation tables.
#[derive(Debug, Default)]
pub struct LayerCaches {
    pub(crate) abbrevs: AbbrevTable,
    pub(crate) tagabrvs: AbbrevTable,
}

/// Pre-warm limits for the abbreviation caches.
#[derive(Debug, Clone)]
pub struct LayerPrewarmConfig {
    pub abbrev_limit: usize,
}

impl Default for LayerPrewarmConfig {
    fn default() -> Self {
        Self {
            abbrev_limit: 1_000_000,
        }
    }
}

/// The layer storage subsystem.
pub struct LayerSubsystem;

impl StorageSubsystem for LayerSubsystem {
    const NAME: &'static str = "layer";

    const COLUMN_FAMILIES: &'static [&'static str] = &[
        Nodes::CF_NAME,
        ByProps::CF_NAME,
        Tags::CF_NAME,
        TagProps::CF_NAME,
        FwdEdges::CF_NAME,
        RevEdges::CF_NAME,
        NodeDatas::CF_NAME,
        Abbrevs::CF_NAME,
        TagAbrvs::CF_NAME,
        EditLogs::CF_NAME,
        Cursors::CF_NAME,
        Metas::CF_NAME,
    ];

    type PrewarmConfig = LayerPrewarmConfig;
    type Cache = LayerCaches;

    fn create_cache() -> Arc<Self::Cache> {
        Arc::new(LayerCaches::default())
    }

    fn cf_descriptors(
        block_cache: &rocksdb::Cache,
        config: &BlockCacheConfig,
    ) -> Vec<rocksdb::ColumnFamilyDescriptor> {
        vec![
            rocksdb::ColumnFamilyDescriptor::new(
                Nodes::CF_NAME,
                Nodes::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                ByProps::CF_NAME,
                ByProps::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                Tags::CF_NAME,
                Tags::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                TagProps::CF_NAME,
                TagProps::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                FwdEdges::CF_NAME,
                FwdEdges::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                RevEdges::CF_NAME,
                RevEdges::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                NodeDatas::CF_NAME,
                NodeDatas::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                Abbrevs::CF_NAME,
                Abbrevs::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                TagAbrvs::CF_NAME,
                TagAbrvs::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                EditLogs::CF_NAME,
                EditLogs::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                Cursors::CF_NAME,
                Cursors::cf_options(block_cache, config),
            ),
            rocksdb::ColumnFamilyDescriptor::new(
                Metas::CF_NAME,
                Metas::cf_options(block_cache, config),
            ),
        ]
    }

    #[tracing::instrument(skip(db, cache, config))]
    fn prewarm(
        db: &dyn DbAccess,
        cache: &Self::Cache,
        config: &Self::PrewarmConfig,
    ) -> Result<usize> {
        let abbrevs = prewarm_cf::<Abbrevs, _>(db, config.abbrev_limit, |key, value| {
            cache.abbrevs.insert(key.0, value.0.clone());
            Ok(())
        })?;
        let tagabrvs = prewarm_cf::<TagAbrvs, _>(db, config.abbrev_limit, |key, value| {
            cache.tagabrvs.insert(key.0, value.0.clone());
            Ok(())
        })?;
        tracing::debug!(abbrevs, tagabrvs, "Pre-warmed abbreviation caches");
        Ok(abbrevs + tagabrvs)
    }
}
