//! Typed error conditions for layer operations.
//!
//! Infrastructure seams (channels, storage open/close) use `anyhow` with
//! context, but callers of the apply pipeline and the codecs need to
//! distinguish specific failure classes: malformed edits are rejected before
//! any mutation, NaN comparisons are a caller bug, and corruption is a
//! storage-layer bug that must never be confused with an ordinary miss.

use crate::Buid;

/// Typed errors surfaced by layer operations.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// An edit kind is invalid for the node's current existence state
    /// (e.g. prop-set before node-add). Rejected before any mutation.
    #[error("bad edit for node {buid}: {mesg}")]
    BadEdit { buid: Buid, mesg: String },

    /// A value failed StorType normalization.
    #[error("bad value for type {stype}: {mesg}")]
    BadValu { stype: &'static str, mesg: String },

    /// An inequality or range comparison was attempted against NaN.
    /// NaN has no ordering, so the comparison has no meaningful result.
    #[error("comparison against NaN has no ordering")]
    NotANumberCompared,

    /// A nested edit tree exceeded the recursion cap.
    #[error("edit nesting exceeds depth limit of {limit}")]
    EditDepthExceeded { limit: usize },

    /// The referenced property is not defined in the data model.
    #[error("no such property: {form}:{prop}")]
    NoSuchProp { form: String, prop: String },

    /// The referenced form is not defined in the data model.
    #[error("no such form: {form}")]
    NoSuchForm { form: String },

    /// The layer is flagged read-only (canrev = false); revision operations
    /// such as model migration are refused.
    #[error("layer is read-only (canrev = false)")]
    ReadOnlyLayer,

    /// Stored state is internally inconsistent - e.g. an abbreviation id
    /// appears in an index key with no entry in the abbreviation table.
    /// Distinct from not-found: this indicates a storage-layer bug.
    #[error("storage corruption: {0}")]
    Corruption(String),
}

impl LayerError {
    pub(crate) fn bad_edit(buid: Buid, mesg: impl Into<String>) -> Self {
        LayerError::BadEdit {
            buid,
            mesg: mesg.into(),
        }
    }

    pub(crate) fn bad_valu(stype: &'static str, mesg: impl Into<String>) -> Self {
        LayerError::BadValu {
            stype,
            mesg: mesg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayerError::NotANumberCompared;
        assert!(err.to_string().contains("NaN"));

        let err = LayerError::Corruption("abbrev 7 missing".to_string());
        assert!(err.to_string().contains("corruption"));
    }
}
