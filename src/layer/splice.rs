//! Splices: human-readable change events projected from committed log
//! entries.
//!
//! A splice stream is a pure function of the log - no state of its own, no
//! storage. Projecting the same entry always yields the same events in the
//! same order, so consumers at different offsets see identical histories.
//!
//! Node-data edits carry opaque blobs and are deliberately absent from the
//! splice stream.

use serde::{Deserialize, Serialize};

use super::edit::{NodeEdit, SubEdit};
use super::editlog::LogEntry;
use super::stortype::Valu;
use crate::{Buid, TimestampMilli};

/// One change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Splice {
    /// Log offset of the batch this event came from.
    pub offs: u64,
    pub user: Option<String>,
    pub time: Option<TimestampMilli>,
    pub prov: Option<String>,
    pub event: SpliceEvent,
}

/// The event payload. All variants identify the node by buid and form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpliceEvent {
    NodeAdd {
        buid: Buid,
        form: String,
        valu: Valu,
    },
    NodeDel {
        buid: Buid,
        form: String,
    },
    PropSet {
        buid: Buid,
        form: String,
        prop: String,
        valu: Valu,
        /// Value the property held before the edit, when it had one.
        oldv: Option<Valu>,
    },
    PropDel {
        buid: Buid,
        form: String,
        prop: String,
    },
    TagSet {
        buid: Buid,
        form: String,
        tag: String,
        ival: Option<(TimestampMilli, TimestampMilli)>,
        /// Interval state before the edit: `None` = newly tagged,
        /// `Some(None)` = was tagged without an interval.
        oldv: Option<Option<(TimestampMilli, TimestampMilli)>>,
    },
    TagDel {
        buid: Buid,
        form: String,
        tag: String,
    },
    TagPropSet {
        buid: Buid,
        form: String,
        tag: String,
        prop: String,
        valu: Valu,
    },
    TagPropDel {
        buid: Buid,
        form: String,
        tag: String,
        prop: String,
    },
    EdgeAdd {
        buid: Buid,
        form: String,
        verb: String,
        dst: Buid,
    },
    EdgeDel {
        buid: Buid,
        form: String,
        verb: String,
        dst: Buid,
    },
}

/// Project one committed log entry into its splices, in application order.
pub fn splices_for_entry(entry: &LogEntry) -> Vec<Splice> {
    let mut out = Vec::new();
    for edit in &entry.edits {
        for sub in &edit.edits {
            if let Some(event) = event_for_subedit(edit, sub) {
                out.push(Splice {
                    offs: entry.offs,
                    user: entry.meta.user.clone(),
                    time: entry.meta.time,
                    prov: entry.meta.prov.clone(),
                    event,
                });
            }
        }
    }
    out
}

fn event_for_subedit(edit: &NodeEdit, sub: &SubEdit) -> Option<SpliceEvent> {
    let buid = edit.buid;
    let form = edit.form.clone();
    match sub {
        SubEdit::NodeAdd { valu, .. } => Some(SpliceEvent::NodeAdd {
            buid,
            form,
            valu: valu.clone(),
        }),
        SubEdit::NodeDel { .. } => Some(SpliceEvent::NodeDel { buid, form }),
        SubEdit::PropSet {
            prop, valu, oldv, ..
        } => Some(SpliceEvent::PropSet {
            buid,
            form,
            prop: prop.clone(),
            valu: valu.clone(),
            oldv: oldv.clone(),
        }),
        SubEdit::PropDel { prop, .. } => Some(SpliceEvent::PropDel {
            buid,
            form,
            prop: prop.clone(),
        }),
        SubEdit::TagSet {
            tag, ival, oldv, ..
        } => Some(SpliceEvent::TagSet {
            buid,
            form,
            tag: tag.clone(),
            ival: *ival,
            oldv: *oldv,
        }),
        SubEdit::TagDel { tag, .. } => Some(SpliceEvent::TagDel {
            buid,
            form,
            tag: tag.clone(),
        }),
        SubEdit::TagPropSet {
            tag, prop, valu, ..
        } => Some(SpliceEvent::TagPropSet {
            buid,
            form,
            tag: tag.clone(),
            prop: prop.clone(),
            valu: valu.clone(),
        }),
        SubEdit::TagPropDel { tag, prop, .. } => Some(SpliceEvent::TagPropDel {
            buid,
            form,
            tag: tag.clone(),
            prop: prop.clone(),
        }),
        SubEdit::EdgeAdd { verb, dst, .. } => Some(SpliceEvent::EdgeAdd {
            buid,
            form,
            verb: verb.clone(),
            dst: *dst,
        }),
        SubEdit::EdgeDel { verb, dst, .. } => Some(SpliceEvent::EdgeDel {
            buid,
            form,
            verb: verb.clone(),
            dst: *dst,
        }),
        // Opaque blobs never appear in the splice stream.
        SubEdit::NodeDataSet { .. } | SubEdit::NodeDataDel { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::edit::EditMeta;

    fn entry() -> LogEntry {
        let buid = Buid::derive("person", b"alice");
        LogEntry {
            offs: 7,
            edits: vec![NodeEdit::new(
                buid,
                "person",
                vec![
                    SubEdit::NodeAdd {
                        valu: Valu::Str("alice".to_string()),
                        subs: vec![],
                    },
                    SubEdit::TagSet {
                        tag: "vip".to_string(),
                        ival: None,
                        oldv: None,
                        subs: vec![],
                    },
                    SubEdit::NodeDataSet {
                        name: "notes".to_string(),
                        data: vec![1, 2, 3],
                        subs: vec![],
                    },
                ],
            )],
            meta: EditMeta {
                user: Some("visi".to_string()),
                time: Some(TimestampMilli(12345)),
                prov: None,
            },
        }
    }

    #[test]
    fn test_projection_order_and_meta() {
        let splices = splices_for_entry(&entry());
        assert_eq!(splices.len(), 2);
        assert!(matches!(splices[0].event, SpliceEvent::NodeAdd { .. }));
        assert!(matches!(splices[1].event, SpliceEvent::TagSet { .. }));
        for s in &splices {
            assert_eq!(s.offs, 7);
            assert_eq!(s.user.as_deref(), Some("visi"));
            assert_eq!(s.time, Some(TimestampMilli(12345)));
        }
    }

    #[test]
    fn test_nodedata_excluded() {
        let splices = splices_for_entry(&entry());
        assert!(splices
            .iter()
            .all(|s| !matches!(s.event, SpliceEvent::NodeAdd { ref form, .. } if form.is_empty())));
        // The NodeDataSet subedit produced nothing.
        assert_eq!(splices.len(), 2);
    }

    #[test]
    fn test_old_values_carried_through() {
        let buid = Buid::derive("person", b"alice");
        let entry = LogEntry {
            offs: 0,
            edits: vec![NodeEdit::new(
                buid,
                "person",
                vec![
                    SubEdit::PropSet {
                        prop: "age".to_string(),
                        valu: Valu::Int(31),
                        oldv: Some(Valu::Int(30)),
                        subs: vec![],
                    },
                    SubEdit::TagSet {
                        tag: "vip".to_string(),
                        ival: Some((TimestampMilli(5), TimestampMilli(20))),
                        oldv: Some(Some((TimestampMilli(10), TimestampMilli(20)))),
                        subs: vec![],
                    },
                ],
            )],
            meta: EditMeta::default(),
        };
        let splices = splices_for_entry(&entry);
        assert!(matches!(
            splices[0].event,
            SpliceEvent::PropSet {
                oldv: Some(Valu::Int(30)),
                ..
            }
        ));
        assert!(matches!(
            splices[1].event,
            SpliceEvent::TagSet {
                oldv: Some(Some((TimestampMilli(10), TimestampMilli(20)))),
                ..
            }
        ));
    }

    #[test]
    fn test_projection_deterministic() {
        let e = entry();
        assert_eq!(splices_for_entry(&e), splices_for_entry(&e));
    }
}
