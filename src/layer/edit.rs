//! The edit model: the change language accepted by the apply pipeline and
//! recorded in the edit log.
//!
//! A [`NodeEdit`] is the unit of change for one node; its [`SubEdit`]s are
//! tagged enum variants, one per edit kind, each carrying its own payload
//! fields plus a `subs` list of dependent edits applied depth-first *before*
//! the edit itself (e.g. an edge add whose target node rides along under it
//! and must exist by the time the edge is checked).
//!
//! The same structures travel three paths: caller submissions, edit-log
//! records, and the sync wire format. MessagePack-serializable throughout.

use serde::{Deserialize, Serialize};

use super::errors::LayerError;
use super::stortype::Valu;
use crate::{Buid, TimestampMilli};

/// Maximum nesting depth of dependent edits.
///
/// Deep chains are always expressible as a flat sequence of batches; the cap
/// exists to bound recursion in apply and replay.
pub const MAX_EDIT_DEPTH: usize = 16;

/// Metadata attached to a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditMeta {
    /// Acting user, if known.
    pub user: Option<String>,
    /// Commit time. Absent means "now" at commit.
    pub time: Option<TimestampMilli>,
    /// Provenance string (tool, import job, upstream layer).
    pub prov: Option<String>,
}

/// All edits for one node within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdit {
    pub buid: Buid,
    pub form: String,
    pub edits: Vec<SubEdit>,
}

impl NodeEdit {
    pub fn new(buid: Buid, form: impl Into<String>, edits: Vec<SubEdit>) -> Self {
        Self {
            buid,
            form: form.into(),
            edits,
        }
    }
}

/// One edit kind. Every variant carries `subs`: dependent node edits applied
/// depth-first before this edit, so an edit may reference state its own subs
/// create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubEdit {
    /// Create the node with its primary value.
    NodeAdd {
        valu: Valu,
        subs: Vec<NodeEdit>,
    },
    /// Delete the node and all node-scoped state.
    NodeDel {
        subs: Vec<NodeEdit>,
    },
    /// Set a property value.
    PropSet {
        prop: String,
        valu: Valu,
        /// Value the property held before this edit, recorded by the apply
        /// pipeline on the logged effective edit. Ignored on submission.
        oldv: Option<Valu>,
        subs: Vec<NodeEdit>,
    },
    /// Delete a property.
    PropDel {
        prop: String,
        subs: Vec<NodeEdit>,
    },
    /// Add a tag, optionally with an interval value.
    TagSet {
        tag: String,
        ival: Option<(TimestampMilli, TimestampMilli)>,
        /// Prior tag state: `None` = newly tagged, `Some(None)` = was tagged
        /// without an interval. Recorded by the apply pipeline on the logged
        /// effective edit; ignored on submission.
        oldv: Option<Option<(TimestampMilli, TimestampMilli)>>,
        subs: Vec<NodeEdit>,
    },
    /// Remove a tag (and its tag-properties).
    TagDel {
        tag: String,
        subs: Vec<NodeEdit>,
    },
    /// Set a property scoped to a tag on this node.
    TagPropSet {
        tag: String,
        prop: String,
        valu: Valu,
        subs: Vec<NodeEdit>,
    },
    /// Delete a tag-scoped property.
    TagPropDel {
        tag: String,
        prop: String,
        subs: Vec<NodeEdit>,
    },
    /// Add a directed, verb-labeled edge from this node.
    EdgeAdd {
        verb: String,
        dst: Buid,
        subs: Vec<NodeEdit>,
    },
    /// Remove an edge.
    EdgeDel {
        verb: String,
        dst: Buid,
        subs: Vec<NodeEdit>,
    },
    /// Attach an opaque named MessagePack blob to the node.
    NodeDataSet {
        name: String,
        data: Vec<u8>,
        subs: Vec<NodeEdit>,
    },
    /// Remove a named blob.
    NodeDataDel {
        name: String,
        subs: Vec<NodeEdit>,
    },
}

impl SubEdit {
    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SubEdit::NodeAdd { .. } => "node:add",
            SubEdit::NodeDel { .. } => "node:del",
            SubEdit::PropSet { .. } => "prop:set",
            SubEdit::PropDel { .. } => "prop:del",
            SubEdit::TagSet { .. } => "tag:set",
            SubEdit::TagDel { .. } => "tag:del",
            SubEdit::TagPropSet { .. } => "tagprop:set",
            SubEdit::TagPropDel { .. } => "tagprop:del",
            SubEdit::EdgeAdd { .. } => "edge:add",
            SubEdit::EdgeDel { .. } => "edge:del",
            SubEdit::NodeDataSet { .. } => "nodedata:set",
            SubEdit::NodeDataDel { .. } => "nodedata:del",
        }
    }

    /// Dependent edits applied before this one.
    pub fn subs(&self) -> &[NodeEdit] {
        match self {
            SubEdit::NodeAdd { subs, .. }
            | SubEdit::NodeDel { subs }
            | SubEdit::PropSet { subs, .. }
            | SubEdit::PropDel { subs, .. }
            | SubEdit::TagSet { subs, .. }
            | SubEdit::TagDel { subs, .. }
            | SubEdit::TagPropSet { subs, .. }
            | SubEdit::TagPropDel { subs, .. }
            | SubEdit::EdgeAdd { subs, .. }
            | SubEdit::EdgeDel { subs, .. }
            | SubEdit::NodeDataSet { subs, .. }
            | SubEdit::NodeDataDel { subs, .. } => subs,
        }
    }
}

/// Validate that no edit in the batch nests deeper than [`MAX_EDIT_DEPTH`].
///
/// Runs before any mutation so an over-deep batch is rejected whole.
pub fn check_depth(edits: &[NodeEdit]) -> Result<(), LayerError> {
    fn walk(edits: &[NodeEdit], depth: usize) -> Result<(), LayerError> {
        if depth > MAX_EDIT_DEPTH {
            return Err(LayerError::EditDepthExceeded {
                limit: MAX_EDIT_DEPTH,
            });
        }
        for edit in edits {
            for sub in &edit.edits {
                walk(sub.subs(), depth + 1)?;
            }
        }
        Ok(())
    }
    walk(edits, 1)
}

/// Total number of sub-edits in a batch, nested included. Used for logging.
pub fn count_subedits(edits: &[NodeEdit]) -> usize {
    edits
        .iter()
        .map(|e| {
            e.edits
                .iter()
                .map(|s| 1 + count_subedits(s.subs()))
                .sum::<usize>()
        })
        .sum()
}
