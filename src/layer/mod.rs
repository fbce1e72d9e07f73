//! The layer: versioned, append-logged graph storage.
//!
//! A [`Layer`] owns one RocksDB database holding node records, secondary
//! indexes, the append-only edit log, and sync cursors. All mutation goes
//! through a single writer task reached by channel; reads go straight to
//! storage snapshots. See the module docs on [`apply`](self::apply) for the
//! batch semantics and [`sync`](self::sync) for upstream mirroring.

mod abbrev;
mod apply;
pub mod edit;
mod editlog;
pub mod errors;
mod migrate;
pub mod model;
mod schema;
pub mod splice;
pub mod stortype;
pub mod sync;
mod writer;

pub use apply::AppliedBatch;
pub use editlog::LogEntry;
pub use migrate::MODEL_VERSION;
pub use schema::{LayerPrewarmConfig, LayerSubsystem};
pub use writer::WriterConfig;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::sync::watch;

use self::abbrev::Abrv;
use self::apply::{prop_index_name, Processor};
use self::edit::{EditMeta, NodeEdit};
use self::editlog::NodeEditLog;
use self::errors::LayerError;
use self::model::Model;
use self::schema::{
    byprop_prefix, ByProps, CursorCfKey, Cursors, FwdEdges, Node, NodeCfKey, NodeDataCfKey,
    NodeDatas, Nodes, RevEdges, TagCfKey, TagPropCfKey, TagProps, Tags,
};
use self::splice::{splices_for_entry, Splice};
use self::stortype::{Cmp, IndxOrd, RangeSpec, StorType, Valu};
use self::writer::{create_apply_writer, spawn_apply_consumer, Writer};
use crate::rocksdb::{BlockCacheConfig, ColumnFamily, ColumnFamilySerde, Storage};
use crate::{Buid, SourceId, TimestampMilli};

/// Options for opening a layer.
#[derive(Debug, Clone, Default)]
pub struct LayerConfig {
    pub writer: WriterConfig,
    pub block_cache: BlockCacheConfig,
    pub prewarm: LayerPrewarmConfig,
    /// When set, stamps the canrev flag before opening. Layers with
    /// `canrev = false` refuse migration and truncation.
    pub canrev: Option<bool>,
}

/// A versioned, append-logged graph storage layer.
pub struct Layer {
    storage: Arc<Storage<LayerSubsystem>>,
    model: Arc<Model>,
    log: Arc<NodeEditLog>,
    /// Absent when opened read-only.
    writer: Option<Writer>,
    commit_rx: watch::Receiver<u64>,
    cursor_tx: Arc<DashMap<SourceId, watch::Sender<u64>>>,
}

impl Layer {
    /// Open (or create) a layer read-write.
    ///
    /// Runs pending model migrations, restores the edit log counter, and
    /// spawns the writer task - so this must be called within a tokio
    /// runtime.
    pub fn open(path: &Path, model: Model, config: LayerConfig) -> Result<Arc<Self>> {
        let mut storage = Storage::<LayerSubsystem>::readwrite(path)
            .with_block_cache_config(config.block_cache.clone())
            .with_prewarm_config(config.prewarm.clone());
        storage.ready().context("Failed to open layer storage")?;
        let storage = Arc::new(storage);

        if let Some(canrev) = config.canrev {
            migrate::set_canrev(&storage, canrev)?;
        }
        migrate::migrate(&storage)?;
        let canrev = migrate::canrev(&storage)?;

        let model = Arc::new(model);
        let log = Arc::new(NodeEditLog::restore(storage.db_access()?)?);
        let (commit_tx, commit_rx) = watch::channel(log.index());
        let cursor_tx: Arc<DashMap<SourceId, watch::Sender<u64>>> = Arc::new(DashMap::new());

        let processor = Arc::new(Processor::new(
            storage.clone(),
            model.clone(),
            log.clone(),
            commit_tx,
            cursor_tx.clone(),
            canrev,
        ));
        let (writer, receiver) = create_apply_writer(&config.writer);
        // Detached: exits when the last Writer clone (and the Layer) drops.
        let _handle = spawn_apply_consumer(receiver, processor);

        Ok(Arc::new(Layer {
            storage,
            model,
            log,
            writer: Some(writer),
            commit_rx,
            cursor_tx,
        }))
    }

    /// Open a layer read-only. Reads see the state at open plus whatever
    /// RocksDB surfaces from the shared files; all mutation methods fail.
    pub fn open_readonly(path: &Path, model: Model, config: LayerConfig) -> Result<Arc<Self>> {
        let mut storage = Storage::<LayerSubsystem>::readonly(path)
            .with_block_cache_config(config.block_cache.clone())
            .with_prewarm_config(config.prewarm.clone());
        storage.ready().context("Failed to open layer storage")?;
        let storage = Arc::new(storage);

        let log = Arc::new(NodeEditLog::restore(storage.db_access()?)?);
        let (_commit_tx, commit_rx) = watch::channel(log.index());

        Ok(Arc::new(Layer {
            storage,
            model: Arc::new(model),
            log,
            writer: None,
            commit_rx,
            cursor_tx: Arc::new(DashMap::new()),
        }))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn writer(&self) -> Result<&Writer> {
        self.writer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Layer is open read-only"))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Apply a batch with full validation. Returns the commit outcome.
    pub async fn stor_node_edits(
        &self,
        edits: Vec<NodeEdit>,
        meta: EditMeta,
    ) -> Result<AppliedBatch> {
        self.writer()?.apply(edits, meta, true, None).await
    }

    /// Apply a batch of already-validated edits (log replay, trusted
    /// ingest). Same atomicity and ordering; skips validation reads.
    pub async fn stor_node_edits_no_lift(
        &self,
        edits: Vec<NodeEdit>,
        meta: EditMeta,
    ) -> Result<AppliedBatch> {
        self.writer()?.apply(edits, meta, false, None).await
    }

    /// Ingest one upstream log entry, advancing the source's cursor to
    /// `entry.offs + 1` in the same commit.
    pub async fn ingest_sync_entry(
        &self,
        source: SourceId,
        entry: &LogEntry,
    ) -> Result<AppliedBatch> {
        self.writer()?
            .apply(
                entry.edits.clone(),
                entry.meta.clone(),
                false,
                Some((source, entry.offs + 1)),
            )
            .await
    }

    /// Drop the edit log and reset every sync cursor. Refused when
    /// `canrev = false`. Returns the number of entries removed.
    pub async fn truncate(&self) -> Result<u64> {
        self.writer()?.truncate().await
    }

    // ========================================================================
    // Node reads
    // ========================================================================

    fn read_node(&self, buid: Buid) -> Result<Option<Node>> {
        let key = Nodes::key_to_bytes(&NodeCfKey(buid));
        match self.storage.db_access()?.get_cf(Nodes::CF_NAME, &key)? {
            Some(bytes) => Ok(Some(Nodes::value_from_bytes(&bytes)?.0)),
            None => Ok(None),
        }
    }

    /// The node's primary value, if the node exists.
    pub fn get_node_valu(&self, buid: Buid) -> Result<Option<Valu>> {
        Ok(self.read_node(buid)?.map(|n| n.valu))
    }

    pub fn get_node_form(&self, buid: Buid) -> Result<Option<String>> {
        Ok(self.read_node(buid)?.map(|n| n.form))
    }

    pub fn get_node_prop(&self, buid: Buid, prop: &str) -> Result<Option<Valu>> {
        Ok(self
            .read_node(buid)?
            .and_then(|n| n.props.get(prop).cloned()))
    }

    /// Tag presence and interval: `None` = not tagged, `Some(None)` = tagged
    /// without an interval.
    pub fn get_node_tag(
        &self,
        buid: Buid,
        tag: &str,
    ) -> Result<Option<Option<(TimestampMilli, TimestampMilli)>>> {
        let key = Tags::key_to_bytes(&TagCfKey(buid, tag.to_string()));
        match self.storage.db_access()?.get_cf(Tags::CF_NAME, &key)? {
            Some(bytes) => Ok(Some(Tags::value_from_bytes(&bytes)?.0)),
            None => Ok(None),
        }
    }

    pub fn get_node_tagprop(&self, buid: Buid, tag: &str, prop: &str) -> Result<Option<Valu>> {
        let abrv = match self.storage.cache().tagabrvs.get_abrv(prop) {
            Some(abrv) => abrv,
            None => return Ok(None),
        };
        let key = TagProps::key_to_bytes(&TagPropCfKey(buid, abrv, tag.to_string()));
        match self.storage.db_access()?.get_cf(TagProps::CF_NAME, &key)? {
            Some(bytes) => Ok(Some(TagProps::value_from_bytes(&bytes)?.0)),
            None => Ok(None),
        }
    }

    pub fn get_node_data(&self, buid: Buid, name: &str) -> Result<Option<Vec<u8>>> {
        let key = NodeDatas::key_to_bytes(&NodeDataCfKey(buid, name.to_string()));
        match self.storage.db_access()?.get_cf(NodeDatas::CF_NAME, &key)? {
            Some(bytes) => Ok(Some(NodeDatas::value_from_bytes(&bytes)?.0)),
            None => Ok(None),
        }
    }

    /// Outgoing edges: `(verb, destination)` pairs.
    pub fn edges_from(&self, buid: Buid) -> Result<Vec<(String, Buid)>> {
        self.scan_edges(FwdEdges::CF_NAME, buid)
    }

    /// Incoming edges: `(verb, source)` pairs.
    pub fn edges_to(&self, buid: Buid) -> Result<Vec<(String, Buid)>> {
        self.scan_edges(RevEdges::CF_NAME, buid)
    }

    fn scan_edges(&self, cf_name: &str, buid: Buid) -> Result<Vec<(String, Buid)>> {
        let db = self.storage.db_access()?;
        let cache = self.storage.cache();
        let prefix = buid.as_bytes();
        let mut out = Vec::new();
        for item in db.iterator_cf_from(cf_name, prefix, false)? {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            // Edge keys are (buid, verb, buid) in both CFs.
            let parsed = FwdEdges::key_from_bytes(&key)?;
            let verb = cache.abbrevs.get_name(&parsed.1).ok_or_else(|| {
                LayerError::Corruption(format!(
                    "abbreviation {} in edge key has no name entry",
                    parsed.1
                ))
            })?;
            out.push((verb.as_str().to_string(), parsed.2));
        }
        Ok(out)
    }

    // ========================================================================
    // Index lookups
    // ========================================================================

    /// Nodes matching a comparison against a property (or, with
    /// `prop = None`, against the form's primary value).
    pub fn nodes_by_prop(
        &self,
        form: &str,
        prop: Option<&str>,
        cmp: &Cmp,
    ) -> Result<Vec<Buid>> {
        let (name, stype) = self.resolve_index(form, prop)?;
        let abrv = match self.storage.cache().abbrevs.get_abrv(&name) {
            Some(abrv) => abrv,
            // Nothing was ever stored under this index.
            None => return Ok(Vec::new()),
        };
        let spec = stype.range(cmp)?;
        self.scan_index(abrv, IndxOrd::Main, &spec)
    }

    /// Inclusive range query; sugar over [`nodes_by_prop`](Self::nodes_by_prop).
    pub fn nodes_by_prop_range(
        &self,
        form: &str,
        prop: Option<&str>,
        low: Valu,
        high: Valu,
    ) -> Result<Vec<Buid>> {
        self.nodes_by_prop(form, prop, &Cmp::Range(low, high))
    }

    /// Nodes whose interval property contains the given instant.
    pub fn nodes_by_prop_ival_at(
        &self,
        form: &str,
        prop: Option<&str>,
        at: TimestampMilli,
    ) -> Result<Vec<Buid>> {
        let (name, stype) = self.resolve_index(form, prop)?;
        if stype != StorType::Ival {
            return Err(LayerError::bad_valu(
                stype.name(),
                "interval containment requires an ival property",
            )
            .into());
        }
        let abrv = match self.storage.cache().abbrevs.get_abrv(&name) {
            Some(abrv) => abrv,
            None => return Ok(Vec::new()),
        };

        // End-keyed ordering: every entry from `at` upward ends at or after
        // `at`; the start side is checked against the node record.
        let db = self.storage.db_access()?;
        let prefix = byprop_prefix(abrv, IndxOrd::IvalEnd);
        let mut start_key = prefix.clone();
        start_key.extend_from_slice(&at.0.to_be_bytes());
        let mut out = Vec::new();
        for item in db.iterator_cf_from(ByProps::CF_NAME, &start_key, false)? {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let buid = Buid::from_slice(&key[key.len() - Buid::SIZE..])?;
            let contained = match prop {
                Some(p) => matches!(
                    self.get_node_prop(buid, p)?,
                    Some(Valu::Ival(start, _)) if start <= at
                ),
                None => matches!(
                    self.get_node_valu(buid)?,
                    Some(Valu::Ival(start, _)) if start <= at
                ),
            };
            if contained {
                out.push(buid);
            }
        }
        Ok(out)
    }

    fn resolve_index(&self, form: &str, prop: Option<&str>) -> Result<(String, StorType)> {
        let form_def = self.model.form(form)?;
        match prop {
            None => Ok((form.to_string(), form_def.stype.clone())),
            Some(p) => {
                let def = form_def.prop(p)?;
                if !def.indexed {
                    anyhow::bail!("Property {}:{} is not indexed", form, p);
                }
                Ok((prop_index_name(form, p), def.stype))
            }
        }
    }

    fn scan_index(&self, abrv: Abrv, ord: IndxOrd, spec: &RangeSpec) -> Result<Vec<Buid>> {
        let db = self.storage.db_access()?;
        let prefix = byprop_prefix(abrv, ord);
        let mut out = Vec::new();
        match spec {
            RangeSpec::Exact(valu_keys) => {
                for valu_key in valu_keys {
                    let mut probe = prefix.clone();
                    probe.extend_from_slice(valu_key);
                    for item in db.iterator_cf_from(ByProps::CF_NAME, &probe, false)? {
                        let (key, _) = item?;
                        if !key.starts_with(&probe) {
                            break;
                        }
                        // Longer value keys share the probe prefix; only an
                        // exact-length match is this value.
                        if key.len() != probe.len() + Buid::SIZE {
                            continue;
                        }
                        out.push(Buid::from_slice(&key[probe.len()..])?);
                    }
                }
            }
            RangeSpec::Scan(range) => {
                let mut start = prefix.clone();
                start.extend_from_slice(&range.low);
                for item in db.iterator_cf_from(ByProps::CF_NAME, &start, false)? {
                    let (key, _) = item?;
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    if key.len() < prefix.len() + Buid::SIZE {
                        continue;
                    }
                    let valu_key = &key[prefix.len()..key.len() - Buid::SIZE];
                    if let Some(high) = &range.high {
                        if valu_key > high.as_slice() {
                            break;
                        }
                    }
                    if !range.contains(valu_key) {
                        continue;
                    }
                    out.push(Buid::from_slice(&key[key.len() - Buid::SIZE..])?);
                }
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Edit log and splices
    // ========================================================================

    /// The next log offset (the log length).
    pub fn edit_log_index(&self) -> u64 {
        self.log.index()
    }

    /// Up to `size` log entries starting at `offs`, ascending.
    pub fn slice(&self, offs: u64, size: usize) -> Result<Vec<LogEntry>> {
        self.log.slice(self.storage.db_access()?, offs, size)
    }

    /// Up to `size` log entries ending at `offs` (tail if `None`), descending.
    pub fn slice_back(&self, offs: Option<u64>, size: usize) -> Result<Vec<LogEntry>> {
        self.log.slice_back(self.storage.db_access()?, offs, size)
    }

    /// The single log entry at `offs`, if committed.
    pub fn log_entry(&self, offs: u64) -> Result<Option<LogEntry>> {
        self.log.get(self.storage.db_access()?, offs)
    }

    /// Splices projected from the log, starting at `offs`.
    pub fn splices(&self, offs: u64, size: usize) -> Result<Vec<Splice>> {
        Ok(self
            .slice(offs, size)?
            .iter()
            .flat_map(splices_for_entry)
            .collect())
    }

    /// Splices projected from the log tail, most recent entries first.
    pub fn splices_back(&self, offs: Option<u64>, size: usize) -> Result<Vec<Splice>> {
        Ok(self
            .slice_back(offs, size)?
            .iter()
            .flat_map(splices_for_entry)
            .collect())
    }

    /// Commit notifications: the receiver's value is the log index.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.commit_rx.clone()
    }

    /// Wait until the entry at `offs` is committed locally.
    pub async fn wait_offs(&self, offs: u64) -> Result<()> {
        let mut rx = self.subscribe();
        while *rx.borrow_and_update() <= offs {
            rx.changed()
                .await
                .map_err(|_| anyhow::anyhow!("Commit channel closed"))?;
        }
        Ok(())
    }

    // ========================================================================
    // Sync cursors
    // ========================================================================

    /// The durable cursor for an upstream source: the next upstream offset
    /// to ingest. Zero for a source never synced.
    pub fn cursor(&self, source: SourceId) -> Result<u64> {
        let key = Cursors::key_to_bytes(&CursorCfKey(source));
        match self.storage.db_access()?.get_cf(Cursors::CF_NAME, &key)? {
            Some(bytes) => Ok(Cursors::value_from_bytes(&bytes)?.0),
            None => Ok(0),
        }
    }

    fn cursor_rx(&self, source: SourceId) -> Result<watch::Receiver<u64>> {
        let rx = self
            .cursor_tx
            .entry(source)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe();
        // The watch exists before the durable read: a commit landing in
        // between notifies it directly, and raising it to the stored cursor
        // covers commits that landed before it existed.
        let durable = self.cursor(source)?;
        if let Some(tx) = self.cursor_tx.get(&source) {
            tx.send_if_modified(|cur| {
                if durable > *cur {
                    *cur = durable;
                    true
                } else {
                    false
                }
            });
        }
        Ok(rx)
    }

    /// Wait until the upstream entry at `offs` has been ingested from
    /// `source` (i.e. the cursor has passed it).
    pub async fn wait_upstream_offs(&self, source: SourceId, offs: u64) -> Result<()> {
        let mut rx = self.cursor_rx(source)?;
        while *rx.borrow_and_update() <= offs {
            rx.changed()
                .await
                .map_err(|_| anyhow::anyhow!("Cursor channel closed"))?;
        }
        Ok(())
    }
}
