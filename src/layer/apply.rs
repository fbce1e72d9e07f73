//! The apply pipeline: validated, atomic application of edit batches.
//!
//! All writes to a layer funnel through a single [`Processor`], owned by the
//! writer consumer task. Each batch runs in one RocksDB transaction covering
//! the primary node records, every secondary index, the edit-log append, and
//! (for sync replay) the upstream cursor advance. One `txn.commit()` per
//! batch; a failed batch leaves no trace.
//!
//! Edits that would not change stored state are filtered out before logging,
//! so re-applying a batch appends nothing: the log records what happened, not
//! what was asked.
//!
//! Two entry modes share the code path:
//! - **lift** (caller submissions): full validation - model membership, value
//!   normalization, buid derivation, existence-state checks.
//! - **no-lift** (log replay, sync ingest): edits were validated when first
//!   lifted; existence-state mismatches degrade to skips instead of errors so
//!   replay over divergent local state cannot wedge the sync loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use super::abbrev::Abrv;
use super::edit::{check_depth, count_subedits, EditMeta, NodeEdit, SubEdit};
use super::editlog::NodeEditLog;
use super::errors::LayerError;
use super::model::{Model, PROP_CREATED};
use super::schema::{
    AbbrevCfKey, AbbrevCfValue, Abbrevs, ByPropCfKey, ByPropCfValue, ByProps,
    CursorCfKey, CursorCfValue, Cursors, FwdEdgeCfKey, FwdEdgeCfValue, FwdEdges, LayerCaches,
    LayerSubsystem, Node, NodeCfKey, NodeCfValue, NodeDataCfKey, NodeDataCfValue, NodeDatas,
    Nodes, RevEdgeCfKey, RevEdgeCfValue, RevEdges, TagAbrvCfKey, TagAbrvCfValue, TagAbrvs,
    TagCfKey, TagCfValue, TagPropCfKey, TagPropCfValue, TagProps, Tags,
};
use super::stortype::{MergePolicy, StorType, Valu};
use crate::rocksdb::{ColumnFamily, ColumnFamilySerde, Storage};
use crate::{Buid, SourceId, TimestampMilli};

type Txn<'a> = rocksdb::Transaction<'a, rocksdb::TransactionDB>;

/// Outcome of one applied batch.
#[derive(Debug, Clone)]
pub struct AppliedBatch {
    /// Log offset the batch was recorded at. `None` when every edit was a
    /// no-op and nothing was logged.
    pub offs: Option<u64>,
    /// The effective edits, flattened into depth-first application order.
    pub edits: Vec<NodeEdit>,
    /// Metadata as committed (time resolved).
    pub meta: EditMeta,
}

/// The single-writer batch processor.
///
/// Owns no locks: serialization comes from being driven by exactly one
/// consumer task.
pub(crate) struct Processor {
    storage: Arc<Storage<LayerSubsystem>>,
    model: Arc<Model>,
    log: Arc<NodeEditLog>,
    /// Bumped to the post-commit log index after every logged batch.
    commit_tx: watch::Sender<u64>,
    /// Per-source cursor watches, bumped when a sync commit advances one.
    cursor_tx: Arc<dashmap::DashMap<SourceId, watch::Sender<u64>>>,
    /// Whether this layer may be revised (truncated, migrated).
    canrev: bool,
}

impl Processor {
    pub(crate) fn new(
        storage: Arc<Storage<LayerSubsystem>>,
        model: Arc<Model>,
        log: Arc<NodeEditLog>,
        commit_tx: watch::Sender<u64>,
        cursor_tx: Arc<dashmap::DashMap<SourceId, watch::Sender<u64>>>,
        canrev: bool,
    ) -> Self {
        Self {
            storage,
            model,
            log,
            commit_tx,
            cursor_tx,
            canrev,
        }
    }

    /// Apply one batch atomically.
    ///
    /// `cursor` carries `(source, next_offs)` when the batch is a sync replay;
    /// the cursor advance commits with the batch, so a crash can never ingest
    /// an upstream entry twice or skip one.
    #[tracing::instrument(
        skip(self, edits, meta),
        fields(nodes = edits.len(), subedits = count_subedits(edits))
    )]
    pub(crate) fn apply(
        &self,
        edits: &[NodeEdit],
        meta: &EditMeta,
        lift: bool,
        cursor: Option<(SourceId, u64)>,
    ) -> Result<AppliedBatch> {
        check_depth(edits)?;

        let mut meta = meta.clone();
        let meta_time = match meta.time {
            Some(t) => t,
            None => {
                let now = TimestampMilli::now();
                meta.time = Some(now);
                now
            }
        };

        let txn_db = self.storage.transaction_db()?;
        let caches = self.storage.cache();
        let txn = txn_db.transaction();

        let ctx = TxnCtx {
            txn: &txn,
            txn_db,
            caches,
            model: &self.model,
            lift,
            meta_time,
        };

        let mut effective = Vec::new();
        for edit in edits {
            apply_node_edit(&ctx, edit, &mut effective)?;
        }

        let offs = if effective.is_empty() {
            None
        } else {
            Some(self.log.stage_append(&txn, txn_db, &effective, &meta)?)
        };

        if let Some((source, next_offs)) = cursor {
            stage_cursor(&txn, txn_db, source, next_offs)?;
        }

        if offs.is_none() && cursor.is_none() {
            // Nothing to persist; skip the empty commit.
            return Ok(AppliedBatch {
                offs: None,
                edits: effective,
                meta,
            });
        }

        txn.commit().context("Failed to commit edit batch")?;

        if let Some(offs) = offs {
            self.log.advance(offs);
            let _ = self.commit_tx.send(self.log.index());
            tracing::debug!(offs, edits = effective.len(), "Committed edit batch");
        }
        if let Some((source, next_offs)) = cursor {
            if let Some(tx) = self.cursor_tx.get(&source) {
                let _ = tx.send(next_offs);
            }
            tracing::trace!(%source, next_offs, "Advanced sync cursor");
        }

        Ok(AppliedBatch {
            offs,
            edits: effective,
            meta,
        })
    }

    /// Drop the entire edit log and reset every sync cursor, atomically.
    ///
    /// Offsets restart at zero afterwards; downstream consumers observe the
    /// reset through the commit and cursor watches.
    #[tracing::instrument(skip(self))]
    pub(crate) fn truncate(&self) -> Result<u64> {
        if !self.canrev {
            return Err(LayerError::ReadOnlyLayer.into());
        }

        let txn_db = self.storage.transaction_db()?;
        let db = self.storage.db_access()?;
        let txn = txn_db.transaction();

        let deleted = self.log.stage_truncate(&txn, txn_db, db)?;
        let cursors_cf = cf(txn_db, Cursors::CF_NAME)?;
        for item in db.iterator_cf(Cursors::CF_NAME)? {
            let (key, _) = item?;
            txn.delete_cf(cursors_cf, key)?;
        }

        txn.commit().context("Failed to commit truncate")?;
        self.log.reset();
        let _ = self.commit_tx.send(0);
        for entry in self.cursor_tx.iter() {
            let _ = entry.value().send(0);
        }
        tracing::info!(deleted, "Truncated edit log");
        Ok(deleted)
    }
}

// ============================================================================
// Transaction context and per-edit application
// ============================================================================

struct TxnCtx<'a> {
    txn: &'a Txn<'a>,
    txn_db: &'a rocksdb::TransactionDB,
    caches: &'a LayerCaches,
    model: &'a Model,
    lift: bool,
    meta_time: TimestampMilli,
}

fn cf<'a>(txn_db: &'a rocksdb::TransactionDB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    txn_db
        .cf_handle(name)
        .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", name))
}

fn apply_node_edit(ctx: &TxnCtx<'_>, edit: &NodeEdit, out: &mut Vec<NodeEdit>) -> Result<()> {
    let mut effective = Vec::new();

    for sub in &edit.edits {
        // Dependent edits go first so a sub-edit can reference state they
        // create (an edge whose target node rides along under it). They run
        // whether or not the parent turns out to be a no-op.
        for dep in sub.subs() {
            apply_node_edit(ctx, dep, out)?;
        }
        if let Some(applied) = apply_sub_edit(ctx, edit, sub)? {
            effective.push(applied);
        }
    }

    if !effective.is_empty() {
        out.push(NodeEdit::new(edit.buid, edit.form.clone(), effective));
    }
    Ok(())
}

/// Apply one sub-edit; returns the effective (flattened) form, or `None` for
/// a no-op.
fn apply_sub_edit(
    ctx: &TxnCtx<'_>,
    edit: &NodeEdit,
    sub: &SubEdit,
) -> Result<Option<SubEdit>> {
    match sub {
        SubEdit::NodeAdd { valu, .. } => node_add(ctx, edit, valu),
        SubEdit::NodeDel { .. } => node_del(ctx, edit.buid),
        SubEdit::PropSet { prop, valu, .. } => prop_set(ctx, edit, prop, valu),
        SubEdit::PropDel { prop, .. } => prop_del(ctx, edit, prop),
        SubEdit::TagSet { tag, ival, .. } => tag_set(ctx, edit.buid, tag, *ival),
        SubEdit::TagDel { tag, .. } => tag_del(ctx, edit.buid, tag),
        SubEdit::TagPropSet {
            tag, prop, valu, ..
        } => tag_prop_set(ctx, edit.buid, tag, prop, valu),
        SubEdit::TagPropDel { tag, prop, .. } => tag_prop_del(ctx, edit.buid, tag, prop),
        SubEdit::EdgeAdd { verb, dst, .. } => edge_add(ctx, edit.buid, verb, *dst),
        SubEdit::EdgeDel { verb, dst, .. } => edge_del(ctx, edit.buid, verb, *dst),
        SubEdit::NodeDataSet { name, data, .. } => node_data_set(ctx, edit.buid, name, data),
        SubEdit::NodeDataDel { name, .. } => node_data_del(ctx, edit.buid, name),
    }
}

// ============================================================================
// Node record access
// ============================================================================

fn get_node(ctx: &TxnCtx<'_>, buid: Buid) -> Result<Option<Node>> {
    let cf = cf(ctx.txn_db, Nodes::CF_NAME)?;
    let key = Nodes::key_to_bytes(&NodeCfKey(buid));
    match ctx.txn.get_cf(cf, key)? {
        Some(bytes) => Ok(Some(Nodes::value_from_bytes(&bytes)?.0)),
        None => Ok(None),
    }
}

fn put_node(ctx: &TxnCtx<'_>, buid: Buid, node: &Node) -> Result<()> {
    let cf = cf(ctx.txn_db, Nodes::CF_NAME)?;
    let key = Nodes::key_to_bytes(&NodeCfKey(buid));
    let value = Nodes::value_to_bytes(&NodeCfValue(node.clone()))?;
    ctx.txn.put_cf(cf, key, value)?;
    Ok(())
}

/// A node that must exist for the edit to proceed.
///
/// Under lift a missing node is a rejected edit; under no-lift it means the
/// local layer diverged from the replayed history (e.g. after truncate), and
/// the sub-edit is skipped rather than wedging replay.
enum Existing {
    Node(Node),
    Skip,
}

fn require_node(ctx: &TxnCtx<'_>, buid: Buid, what: &str) -> Result<Existing> {
    match get_node(ctx, buid)? {
        Some(node) => Ok(Existing::Node(node)),
        None if ctx.lift => Err(LayerError::bad_edit(
            buid,
            format!("{} on a node that does not exist", what),
        )
        .into()),
        None => {
            tracing::warn!(%buid, what, "Skipping replayed edit for missing node");
            Ok(Existing::Skip)
        }
    }
}

// ============================================================================
// Abbreviation interning (persisted on first use)
// ============================================================================

fn intern_abbrev(ctx: &TxnCtx<'_>, name: &str) -> Result<Abrv> {
    let (abrv, is_new) = ctx.caches.abbrevs.intern(name);
    if is_new {
        let cf = cf(ctx.txn_db, Abbrevs::CF_NAME)?;
        let key = Abbrevs::key_to_bytes(&AbbrevCfKey(abrv));
        let value = Abbrevs::value_to_bytes(&AbbrevCfValue(name.to_string()))?;
        ctx.txn.put_cf(cf, key, value)?;
    }
    Ok(abrv)
}

fn intern_tagabrv(ctx: &TxnCtx<'_>, name: &str) -> Result<Abrv> {
    let (abrv, is_new) = ctx.caches.tagabrvs.intern(name);
    if is_new {
        let cf = cf(ctx.txn_db, TagAbrvs::CF_NAME)?;
        let key = TagAbrvs::key_to_bytes(&TagAbrvCfKey(abrv));
        let value = TagAbrvs::value_to_bytes(&TagAbrvCfValue(name.to_string()))?;
        ctx.txn.put_cf(cf, key, value)?;
    }
    Ok(abrv)
}

/// The name a property is indexed under. Per-form props are qualified so two
/// forms sharing a prop name never share an index; universal (dotted) props
/// share one index across forms.
pub(crate) fn prop_index_name(form: &str, prop: &str) -> String {
    if prop.starts_with('.') {
        prop.to_string()
    } else {
        format!("{}:{}", form, prop)
    }
}

// ============================================================================
// Secondary index maintenance
// ============================================================================

fn index_put(
    ctx: &TxnCtx<'_>,
    abrv: Abrv,
    stype: &StorType,
    valu: &Valu,
    buid: Buid,
) -> Result<()> {
    let cf = cf(ctx.txn_db, ByProps::CF_NAME)?;
    for indx in stype.index_keys(valu).map_err(anyhow::Error::from)? {
        let key = ByProps::key_to_bytes(&ByPropCfKey(abrv, indx.ord, indx.key, buid));
        let value = ByProps::value_to_bytes(&ByPropCfValue(()))?;
        ctx.txn.put_cf(cf, key, value)?;
    }
    Ok(())
}

fn index_del(
    ctx: &TxnCtx<'_>,
    abrv: Abrv,
    stype: &StorType,
    valu: &Valu,
    buid: Buid,
) -> Result<()> {
    let cf = cf(ctx.txn_db, ByProps::CF_NAME)?;
    for indx in stype.index_keys(valu).map_err(anyhow::Error::from)? {
        let key = ByProps::key_to_bytes(&ByPropCfKey(abrv, indx.ord, indx.key, buid));
        ctx.txn.delete_cf(cf, key)?;
    }
    Ok(())
}

// ============================================================================
// Edit kind implementations
// ============================================================================

fn node_add(ctx: &TxnCtx<'_>, edit: &NodeEdit, valu: &Valu) -> Result<Option<SubEdit>> {
    let form = ctx.model.form(&edit.form)?;
    let valu = form.stype.norm(valu.clone())?;

    if ctx.lift {
        let primary_key = form.stype.encode(&valu)?;
        let derived = Buid::derive(&edit.form, &primary_key);
        if derived != edit.buid {
            return Err(LayerError::bad_edit(
                edit.buid,
                format!("buid does not match form {} primary value", edit.form),
            )
            .into());
        }
    }

    match get_node(ctx, edit.buid)? {
        Some(mut node) => {
            // Node exists: the only thing an add can still change is
            // `.created`, which merges earliest-wins.
            let incoming = Valu::Time(ctx.meta_time);
            let merged = match node.props.get(PROP_CREATED) {
                Some(old) => StorType::Time.merge(MergePolicy::EarliestWins, old, incoming)?,
                None => incoming,
            };
            if node.props.get(PROP_CREATED) == Some(&merged) {
                return Ok(None);
            }
            let oldv = node.props.get(PROP_CREATED).cloned();
            reindex_prop(ctx, edit, PROP_CREATED, oldv.as_ref(), &merged)?;
            node.props.insert(PROP_CREATED.to_string(), merged.clone());
            put_node(ctx, edit.buid, &node)?;
            Ok(Some(SubEdit::PropSet {
                prop: PROP_CREATED.to_string(),
                valu: merged,
                oldv,
                subs: vec![],
            }))
        }
        None => {
            let mut props = BTreeMap::new();
            props.insert(PROP_CREATED.to_string(), Valu::Time(ctx.meta_time));
            let node = Node {
                form: edit.form.clone(),
                valu: valu.clone(),
                props,
            };
            put_node(ctx, edit.buid, &node)?;

            // Primary value is indexed under the form's own name.
            let abrv = intern_abbrev(ctx, &edit.form)?;
            index_put(ctx, abrv, &form.stype, &valu, edit.buid)?;
            let created_abrv = intern_abbrev(ctx, PROP_CREATED)?;
            index_put(
                ctx,
                created_abrv,
                &StorType::Time,
                &Valu::Time(ctx.meta_time),
                edit.buid,
            )?;

            Ok(Some(SubEdit::NodeAdd {
                valu,
                subs: vec![],
            }))
        }
    }
}

fn node_del(ctx: &TxnCtx<'_>, buid: Buid) -> Result<Option<SubEdit>> {
    let node = match get_node(ctx, buid)? {
        Some(node) => node,
        None => return Ok(None),
    };
    let form = ctx.model.form(&node.form)?;

    // Primary + prop index entries, recomputed from the record.
    let abrv = intern_abbrev(ctx, &node.form)?;
    index_del(ctx, abrv, &form.stype, &node.valu, buid)?;
    for (prop, valu) in &node.props {
        let def = form.prop(prop)?;
        if def.indexed {
            let abrv = intern_abbrev(ctx, &prop_index_name(&node.form, prop))?;
            index_del(ctx, abrv, &def.stype, valu, buid)?;
        }
    }

    // All node-scoped rows share the buid prefix.
    delete_prefix(ctx, Tags::CF_NAME, buid.as_bytes())?;
    delete_prefix(ctx, TagProps::CF_NAME, buid.as_bytes())?;
    delete_prefix(ctx, NodeDatas::CF_NAME, buid.as_bytes())?;

    // Edges in both directions, with their mirrors.
    let fwd_cf = cf(ctx.txn_db, FwdEdges::CF_NAME)?;
    let rev_cf = cf(ctx.txn_db, RevEdges::CF_NAME)?;
    for key_bytes in prefix_keys(ctx, FwdEdges::CF_NAME, buid.as_bytes())? {
        let key = FwdEdges::key_from_bytes(&key_bytes)?;
        ctx.txn.delete_cf(fwd_cf, &key_bytes)?;
        ctx.txn
            .delete_cf(rev_cf, RevEdges::key_to_bytes(&RevEdgeCfKey(key.2, key.1, key.0)))?;
    }
    for key_bytes in prefix_keys(ctx, RevEdges::CF_NAME, buid.as_bytes())? {
        let key = RevEdges::key_from_bytes(&key_bytes)?;
        ctx.txn.delete_cf(rev_cf, &key_bytes)?;
        ctx.txn
            .delete_cf(fwd_cf, FwdEdges::key_to_bytes(&FwdEdgeCfKey(key.2, key.1, key.0)))?;
    }

    let nodes_cf = cf(ctx.txn_db, Nodes::CF_NAME)?;
    ctx.txn
        .delete_cf(nodes_cf, Nodes::key_to_bytes(&NodeCfKey(buid)))?;

    Ok(Some(SubEdit::NodeDel { subs: vec![] }))
}

fn prop_set(
    ctx: &TxnCtx<'_>,
    edit: &NodeEdit,
    prop: &str,
    valu: &Valu,
) -> Result<Option<SubEdit>> {
    let mut node = match require_node(ctx, edit.buid, "prop:set")? {
        Existing::Node(node) => node,
        Existing::Skip => return Ok(None),
    };
    let form = ctx.model.form(&node.form)?;
    let def = form.prop(prop)?;
    let valu = def.stype.norm(valu.clone())?;

    let stored = match node.props.get(prop) {
        Some(old) if def.merge != MergePolicy::Replace => {
            def.stype.merge(def.merge, old, valu)?
        }
        _ => valu,
    };
    if node.props.get(prop) == Some(&stored) {
        return Ok(None);
    }

    let oldv = node.props.get(prop).cloned();
    if def.indexed {
        reindex_prop(ctx, edit, prop, oldv.as_ref(), &stored)?;
    }
    node.props.insert(prop.to_string(), stored.clone());
    put_node(ctx, edit.buid, &node)?;

    Ok(Some(SubEdit::PropSet {
        prop: prop.to_string(),
        valu: stored,
        oldv,
        subs: vec![],
    }))
}

fn reindex_prop(
    ctx: &TxnCtx<'_>,
    edit: &NodeEdit,
    prop: &str,
    old: Option<&Valu>,
    new: &Valu,
) -> Result<()> {
    let form = ctx.model.form(&edit.form)?;
    let def = form.prop(prop)?;
    let abrv = intern_abbrev(ctx, &prop_index_name(&edit.form, prop))?;
    if let Some(old) = old {
        index_del(ctx, abrv, &def.stype, old, edit.buid)?;
    }
    index_put(ctx, abrv, &def.stype, new, edit.buid)
}

fn prop_del(ctx: &TxnCtx<'_>, edit: &NodeEdit, prop: &str) -> Result<Option<SubEdit>> {
    let mut node = match require_node(ctx, edit.buid, "prop:del")? {
        Existing::Node(node) => node,
        Existing::Skip => return Ok(None),
    };
    let old = match node.props.remove(prop) {
        Some(old) => old,
        None => return Ok(None),
    };

    let form = ctx.model.form(&node.form)?;
    let def = form.prop(prop)?;
    if def.indexed {
        let abrv = intern_abbrev(ctx, &prop_index_name(&node.form, prop))?;
        index_del(ctx, abrv, &def.stype, &old, edit.buid)?;
    }
    put_node(ctx, edit.buid, &node)?;

    Ok(Some(SubEdit::PropDel {
        prop: prop.to_string(),
        subs: vec![],
    }))
}

fn tag_set(
    ctx: &TxnCtx<'_>,
    buid: Buid,
    tag: &str,
    ival: Option<(TimestampMilli, TimestampMilli)>,
) -> Result<Option<SubEdit>> {
    if let Existing::Skip = require_node(ctx, buid, "tag:set")? {
        return Ok(None);
    }
    let tags_cf = cf(ctx.txn_db, Tags::CF_NAME)?;
    let key = Tags::key_to_bytes(&TagCfKey(buid, tag.to_string()));

    let existing = match ctx.txn.get_cf(tags_cf, &key)? {
        Some(bytes) => Some(Tags::value_from_bytes(&bytes)?.0),
        None => None,
    };

    // Tag intervals only ever widen: re-tagging unions with the current span.
    let stored = match (existing.flatten(), ival) {
        (Some((s1, e1)), Some((s2, e2))) => Some((s1.min(s2), std::cmp::max(e1, e2))),
        (Some(existing), None) => Some(existing),
        (None, incoming) => incoming,
    };
    if existing == Some(stored) {
        return Ok(None);
    }

    let value = Tags::value_to_bytes(&TagCfValue(stored))?;
    ctx.txn.put_cf(tags_cf, key, value)?;

    Ok(Some(SubEdit::TagSet {
        tag: tag.to_string(),
        ival: stored,
        oldv: existing,
        subs: vec![],
    }))
}

fn tag_del(ctx: &TxnCtx<'_>, buid: Buid, tag: &str) -> Result<Option<SubEdit>> {
    let tags_cf = cf(ctx.txn_db, Tags::CF_NAME)?;
    let key = Tags::key_to_bytes(&TagCfKey(buid, tag.to_string()));
    if ctx.txn.get_cf(tags_cf, &key)?.is_none() {
        return Ok(None);
    }
    ctx.txn.delete_cf(tags_cf, key)?;

    // Tag-props for this tag go with it.
    let tagprops_cf = cf(ctx.txn_db, TagProps::CF_NAME)?;
    for key_bytes in prefix_keys(ctx, TagProps::CF_NAME, buid.as_bytes())? {
        let key = TagProps::key_from_bytes(&key_bytes)?;
        if key.2 == tag {
            ctx.txn.delete_cf(tagprops_cf, &key_bytes)?;
        }
    }

    Ok(Some(SubEdit::TagDel {
        tag: tag.to_string(),
        subs: vec![],
    }))
}

fn tag_prop_set(
    ctx: &TxnCtx<'_>,
    buid: Buid,
    tag: &str,
    prop: &str,
    valu: &Valu,
) -> Result<Option<SubEdit>> {
    if let Existing::Skip = require_node(ctx, buid, "tagprop:set")? {
        return Ok(None);
    }
    let abrv = intern_tagabrv(ctx, prop)?;
    let tagprops_cf = cf(ctx.txn_db, TagProps::CF_NAME)?;
    let key = TagProps::key_to_bytes(&TagPropCfKey(buid, abrv, tag.to_string()));

    if let Some(bytes) = ctx.txn.get_cf(tagprops_cf, &key)? {
        if &TagProps::value_from_bytes(&bytes)?.0 == valu {
            return Ok(None);
        }
    }
    let value = TagProps::value_to_bytes(&TagPropCfValue(valu.clone()))?;
    ctx.txn.put_cf(tagprops_cf, key, value)?;

    Ok(Some(SubEdit::TagPropSet {
        tag: tag.to_string(),
        prop: prop.to_string(),
        valu: valu.clone(),
        subs: vec![],
    }))
}

fn tag_prop_del(
    ctx: &TxnCtx<'_>,
    buid: Buid,
    tag: &str,
    prop: &str,
) -> Result<Option<SubEdit>> {
    let abrv = match ctx.caches.tagabrvs.get_abrv(prop) {
        Some(abrv) => abrv,
        None => return Ok(None),
    };
    let tagprops_cf = cf(ctx.txn_db, TagProps::CF_NAME)?;
    let key = TagProps::key_to_bytes(&TagPropCfKey(buid, abrv, tag.to_string()));
    if ctx.txn.get_cf(tagprops_cf, &key)?.is_none() {
        return Ok(None);
    }
    ctx.txn.delete_cf(tagprops_cf, key)?;

    Ok(Some(SubEdit::TagPropDel {
        tag: tag.to_string(),
        prop: prop.to_string(),
        subs: vec![],
    }))
}

fn edge_add(ctx: &TxnCtx<'_>, src: Buid, verb: &str, dst: Buid) -> Result<Option<SubEdit>> {
    if let Existing::Skip = require_node(ctx, src, "edge:add")? {
        return Ok(None);
    }
    if ctx.lift && get_node(ctx, dst)?.is_none() {
        return Err(LayerError::bad_edit(
            src,
            format!("edge '{}' targets a node that does not exist", verb),
        )
        .into());
    }

    let abrv = intern_abbrev(ctx, verb)?;
    let fwd_cf = cf(ctx.txn_db, FwdEdges::CF_NAME)?;
    let fwd_key = FwdEdges::key_to_bytes(&FwdEdgeCfKey(src, abrv, dst));
    if ctx.txn.get_cf(fwd_cf, &fwd_key)?.is_some() {
        return Ok(None);
    }

    ctx.txn
        .put_cf(fwd_cf, fwd_key, FwdEdges::value_to_bytes(&FwdEdgeCfValue(()))?)?;
    let rev_cf = cf(ctx.txn_db, RevEdges::CF_NAME)?;
    let rev_key = RevEdges::key_to_bytes(&RevEdgeCfKey(dst, abrv, src));
    ctx.txn
        .put_cf(rev_cf, rev_key, RevEdges::value_to_bytes(&RevEdgeCfValue(()))?)?;

    Ok(Some(SubEdit::EdgeAdd {
        verb: verb.to_string(),
        dst,
        subs: vec![],
    }))
}

fn edge_del(ctx: &TxnCtx<'_>, src: Buid, verb: &str, dst: Buid) -> Result<Option<SubEdit>> {
    let abrv = match ctx.caches.abbrevs.get_abrv(verb) {
        Some(abrv) => abrv,
        None => return Ok(None),
    };
    let fwd_cf = cf(ctx.txn_db, FwdEdges::CF_NAME)?;
    let fwd_key = FwdEdges::key_to_bytes(&FwdEdgeCfKey(src, abrv, dst));
    if ctx.txn.get_cf(fwd_cf, &fwd_key)?.is_none() {
        return Ok(None);
    }
    ctx.txn.delete_cf(fwd_cf, fwd_key)?;
    let rev_cf = cf(ctx.txn_db, RevEdges::CF_NAME)?;
    ctx.txn
        .delete_cf(rev_cf, RevEdges::key_to_bytes(&RevEdgeCfKey(dst, abrv, src)))?;

    Ok(Some(SubEdit::EdgeDel {
        verb: verb.to_string(),
        dst,
        subs: vec![],
    }))
}

fn node_data_set(
    ctx: &TxnCtx<'_>,
    buid: Buid,
    name: &str,
    data: &[u8],
) -> Result<Option<SubEdit>> {
    if let Existing::Skip = require_node(ctx, buid, "nodedata:set")? {
        return Ok(None);
    }
    let cf = cf(ctx.txn_db, NodeDatas::CF_NAME)?;
    let key = NodeDatas::key_to_bytes(&NodeDataCfKey(buid, name.to_string()));
    if let Some(bytes) = ctx.txn.get_cf(cf, &key)? {
        if NodeDatas::value_from_bytes(&bytes)?.0 == data {
            return Ok(None);
        }
    }
    let value = NodeDatas::value_to_bytes(&NodeDataCfValue(data.to_vec()))?;
    ctx.txn.put_cf(cf, key, value)?;

    Ok(Some(SubEdit::NodeDataSet {
        name: name.to_string(),
        data: data.to_vec(),
        subs: vec![],
    }))
}

fn node_data_del(ctx: &TxnCtx<'_>, buid: Buid, name: &str) -> Result<Option<SubEdit>> {
    let cf = cf(ctx.txn_db, NodeDatas::CF_NAME)?;
    let key = NodeDatas::key_to_bytes(&NodeDataCfKey(buid, name.to_string()));
    if ctx.txn.get_cf(cf, &key)?.is_none() {
        return Ok(None);
    }
    ctx.txn.delete_cf(cf, key)?;

    Ok(Some(SubEdit::NodeDataDel {
        name: name.to_string(),
        subs: vec![],
    }))
}

// ============================================================================
// Cursor staging
// ============================================================================

fn stage_cursor(
    txn: &Txn<'_>,
    txn_db: &rocksdb::TransactionDB,
    source: SourceId,
    next_offs: u64,
) -> Result<()> {
    let cf = cf(txn_db, Cursors::CF_NAME)?;
    let key = Cursors::key_to_bytes(&CursorCfKey(source));
    let value = Cursors::value_to_bytes(&CursorCfValue(next_offs))?;
    txn.put_cf(cf, key, value)?;
    Ok(())
}

// ============================================================================
// Prefix scan helpers (transaction-consistent)
// ============================================================================

fn prefix_keys(ctx: &TxnCtx<'_>, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
    let handle = cf(ctx.txn_db, cf_name)?;
    let mut keys = Vec::new();
    let iter = ctx.txn.iterator_cf(
        handle,
        rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward),
    );
    for item in iter {
        let (key, _) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key);
    }
    Ok(keys)
}

fn delete_prefix(ctx: &TxnCtx<'_>, cf_name: &str, prefix: &[u8]) -> Result<()> {
    let handle = cf(ctx.txn_db, cf_name)?;
    for key in prefix_keys(ctx, cf_name, prefix)? {
        ctx.txn.delete_cf(handle, key)?;
    }
    Ok(())
}
