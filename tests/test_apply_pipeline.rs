//! End-to-end tests for the apply pipeline: validation, no-op diffing,
//! nested edits, and atomic rejection.

mod common;

use std::sync::Arc;

use strata_db::layer::edit::{EditMeta, NodeEdit, SubEdit, MAX_EDIT_DEPTH};
use strata_db::layer::errors::LayerError;
use strata_db::layer::model::{FormDef, Model, PropDef};
use strata_db::layer::stortype::{Cmp, MergePolicy, StorType, Valu};
use strata_db::{Buid, Layer, TimestampMilli};
use tempfile::TempDir;

fn test_model() -> Model {
    Model::new()
        .with_form(
            FormDef::new("person", StorType::Utf8)
                .with_prop(PropDef::new("age", StorType::Int))
                .with_prop(
                    PropDef::new("seen", StorType::Ival).with_merge(MergePolicy::IvalUnion),
                ),
        )
        .with_form(FormDef::new("org", StorType::Utf8))
}

fn open_layer(dir: &TempDir) -> Arc<Layer> {
    common::init_tracing();
    Layer::open(&dir.path().join("db"), test_model(), Default::default()).unwrap()
}

fn person_buid(name: &str) -> Buid {
    Buid::derive("person", name.as_bytes())
}

fn person_add(name: &str) -> NodeEdit {
    NodeEdit::new(
        person_buid(name),
        "person",
        vec![SubEdit::NodeAdd {
            valu: Valu::Str(name.to_string()),
            subs: vec![],
        }],
    )
}

fn meta_at(millis: u64) -> EditMeta {
    EditMeta {
        user: Some("root".to_string()),
        time: Some(TimestampMilli(millis)),
        prov: None,
    }
}

#[tokio::test]
async fn test_reapply_is_noop() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    let first = layer
        .stor_node_edits(vec![person_add("alice")], meta_at(1000))
        .await
        .unwrap();
    assert_eq!(first.offs, Some(0));
    assert_eq!(first.edits.len(), 1);

    // Identical batch at the same time: nothing changes, nothing is logged.
    let second = layer
        .stor_node_edits(vec![person_add("alice")], meta_at(1000))
        .await
        .unwrap();
    assert_eq!(second.offs, None);
    assert!(second.edits.is_empty());
    assert_eq!(layer.edit_log_index(), 1);
}

#[tokio::test]
async fn test_created_earliest_wins() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let buid = person_buid("alice");

    layer
        .stor_node_edits(vec![person_add("alice")], meta_at(1000))
        .await
        .unwrap();
    assert_eq!(
        layer.get_node_prop(buid, ".created").unwrap(),
        Some(Valu::Time(TimestampMilli(1000)))
    );

    // An earlier re-add moves .created back...
    let back = layer
        .stor_node_edits(vec![person_add("alice")], meta_at(500))
        .await
        .unwrap();
    assert!(back.offs.is_some());
    assert_eq!(
        layer.get_node_prop(buid, ".created").unwrap(),
        Some(Valu::Time(TimestampMilli(500)))
    );

    // ...and it only ever moves back: a later re-add is a no-op.
    let later = layer
        .stor_node_edits(vec![person_add("alice")], meta_at(2000))
        .await
        .unwrap();
    assert_eq!(later.offs, None);
    assert_eq!(
        layer.get_node_prop(buid, ".created").unwrap(),
        Some(Valu::Time(TimestampMilli(500)))
    );
}

#[tokio::test]
async fn test_edge_target_created_by_nested_edit() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    let org = Buid::derive("org", b"acme");
    let alice = person_buid("alice");

    // The edge's target does not exist yet; it rides along as a dependent
    // edit under the edge and must be committed before the edge is checked.
    let edit = NodeEdit::new(
        alice,
        "person",
        vec![
            SubEdit::NodeAdd {
                valu: Valu::Str("alice".to_string()),
                subs: vec![],
            },
            SubEdit::EdgeAdd {
                verb: "works_at".to_string(),
                dst: org,
                subs: vec![NodeEdit::new(
                    org,
                    "org",
                    vec![SubEdit::NodeAdd {
                        valu: Valu::Str("acme".to_string()),
                        subs: vec![],
                    }],
                )],
            },
        ],
    );

    let applied = layer
        .stor_node_edits(vec![edit], meta_at(1000))
        .await
        .unwrap();
    assert_eq!(applied.offs, Some(0));
    // Flattened in application order: the org's add, then alice's edits.
    assert_eq!(applied.edits.len(), 2);
    assert_eq!(applied.edits[0].buid, org);
    assert_eq!(applied.edits[1].buid, alice);

    assert_eq!(
        layer.get_node_valu(org).unwrap(),
        Some(Valu::Str("acme".to_string()))
    );
    assert_eq!(
        layer.edges_from(alice).unwrap(),
        vec![("works_at".to_string(), org)]
    );
    assert_eq!(
        layer.edges_to(org).unwrap(),
        vec![("works_at".to_string(), alice)]
    );
}

#[tokio::test]
async fn test_malformed_batch_rejected_whole() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    let carol = person_buid("carol");
    let missing = person_buid("nobody");
    let batch = vec![
        person_add("carol"),
        // prop:set on a node that does not exist is a lift error.
        NodeEdit::new(
            missing,
            "person",
            vec![SubEdit::PropSet {
                prop: "age".to_string(),
                valu: Valu::Int(30),
                oldv: None,
                subs: vec![],
            }],
        ),
    ];

    let err = layer
        .stor_node_edits(batch, meta_at(1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayerError>(),
        Some(LayerError::BadEdit { .. })
    ));

    // The valid half of the batch rolled back with the rest.
    assert_eq!(layer.get_node_valu(carol).unwrap(), None);
    assert_eq!(layer.edit_log_index(), 0);
}

#[tokio::test]
async fn test_bad_buid_rejected() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    // buid derived from a different value than the one being added.
    let edit = NodeEdit::new(
        person_buid("alice"),
        "person",
        vec![SubEdit::NodeAdd {
            valu: Valu::Str("bob".to_string()),
            subs: vec![],
        }],
    );
    let err = layer
        .stor_node_edits(vec![edit], meta_at(1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayerError>(),
        Some(LayerError::BadEdit { .. })
    ));
}

#[tokio::test]
async fn test_depth_limit_enforced() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    let mut edit = person_add("leaf");
    for i in 0..MAX_EDIT_DEPTH + 1 {
        let name = format!("level{}", i);
        edit = NodeEdit::new(
            person_buid(&name),
            "person",
            vec![SubEdit::NodeAdd {
                valu: Valu::Str(name.clone()),
                subs: vec![edit],
            }],
        );
    }

    let err = layer
        .stor_node_edits(vec![edit], meta_at(1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayerError>(),
        Some(LayerError::EditDepthExceeded { .. })
    ));
    assert_eq!(layer.edit_log_index(), 0);
}

#[tokio::test]
async fn test_prop_set_reindexes() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let buid = person_buid("alice");

    let mut edit = person_add("alice");
    edit.edits.push(SubEdit::PropSet {
        prop: "age".to_string(),
        valu: Valu::Int(30),
        oldv: None,
        subs: vec![],
    });
    layer
        .stor_node_edits(vec![edit], meta_at(1000))
        .await
        .unwrap();

    layer
        .stor_node_edits(
            vec![NodeEdit::new(
                buid,
                "person",
                vec![SubEdit::PropSet {
                    prop: "age".to_string(),
                    valu: Valu::Int(40),
                    oldv: None,
                    subs: vec![],
                }],
            )],
            meta_at(1001),
        )
        .await
        .unwrap();

    // Old index entry is gone, new one is live.
    assert!(layer
        .nodes_by_prop("person", Some("age"), &Cmp::Eq(Valu::Int(30)))
        .unwrap()
        .is_empty());
    assert_eq!(
        layer
            .nodes_by_prop("person", Some("age"), &Cmp::Eq(Valu::Int(40)))
            .unwrap(),
        vec![buid]
    );
}

#[tokio::test]
async fn test_tag_interval_widens() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let buid = person_buid("alice");

    let tag_at = |lo: u64, hi: u64| {
        vec![NodeEdit::new(
            buid,
            "person",
            vec![SubEdit::TagSet {
                tag: "watched".to_string(),
                ival: Some((TimestampMilli(lo), TimestampMilli(hi))),
                oldv: None,
                subs: vec![],
            }],
        )]
    };

    layer
        .stor_node_edits(vec![person_add("alice")], meta_at(1000))
        .await
        .unwrap();
    layer
        .stor_node_edits(tag_at(10, 20), meta_at(1001))
        .await
        .unwrap();
    layer
        .stor_node_edits(tag_at(5, 15), meta_at(1002))
        .await
        .unwrap();

    assert_eq!(
        layer.get_node_tag(buid, "watched").unwrap(),
        Some(Some((TimestampMilli(5), TimestampMilli(20))))
    );

    // A span inside the current one changes nothing.
    let inner = layer
        .stor_node_edits(tag_at(7, 12), meta_at(1003))
        .await
        .unwrap();
    assert_eq!(inner.offs, None);
}

#[tokio::test]
async fn test_node_del_removes_all_state() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let alice = person_buid("alice");
    let bob = person_buid("bob");

    let mut edit = person_add("alice");
    edit.edits.push(SubEdit::PropSet {
        prop: "age".to_string(),
        valu: Valu::Int(30),
        oldv: None,
        subs: vec![],
    });
    edit.edits.push(SubEdit::TagSet {
        tag: "vip".to_string(),
        ival: None,
        oldv: None,
        subs: vec![],
    });
    layer
        .stor_node_edits(vec![person_add("bob"), edit], meta_at(1000))
        .await
        .unwrap();
    layer
        .stor_node_edits(
            vec![NodeEdit::new(
                alice,
                "person",
                vec![SubEdit::EdgeAdd {
                    verb: "knows".to_string(),
                    dst: bob,
                    subs: vec![],
                }],
            )],
            meta_at(1001),
        )
        .await
        .unwrap();

    layer
        .stor_node_edits(
            vec![NodeEdit::new(
                alice,
                "person",
                vec![SubEdit::NodeDel { subs: vec![] }],
            )],
            meta_at(1002),
        )
        .await
        .unwrap();

    assert_eq!(layer.get_node_valu(alice).unwrap(), None);
    assert_eq!(layer.get_node_tag(alice, "vip").unwrap(), None);
    assert!(layer.edges_from(alice).unwrap().is_empty());
    // The reverse edge at bob is cleaned up too.
    assert!(layer.edges_to(bob).unwrap().is_empty());
    assert!(layer
        .nodes_by_prop("person", Some("age"), &Cmp::Eq(Valu::Int(30)))
        .unwrap()
        .is_empty());
    assert_eq!(
        layer
            .nodes_by_prop("person", None, &Cmp::Eq(Valu::Str("bob".to_string())))
            .unwrap(),
        vec![bob]
    );
}

#[tokio::test]
async fn test_node_data_byte_equality_noop() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let buid = person_buid("alice");

    layer
        .stor_node_edits(vec![person_add("alice")], meta_at(1000))
        .await
        .unwrap();

    let set = |data: Vec<u8>| {
        vec![NodeEdit::new(
            buid,
            "person",
            vec![SubEdit::NodeDataSet {
                name: "notes".to_string(),
                data,
                subs: vec![],
            }],
        )]
    };

    let first = layer
        .stor_node_edits(set(vec![1, 2, 3]), meta_at(1001))
        .await
        .unwrap();
    assert!(first.offs.is_some());
    assert_eq!(
        layer.get_node_data(buid, "notes").unwrap(),
        Some(vec![1, 2, 3])
    );

    let same = layer
        .stor_node_edits(set(vec![1, 2, 3]), meta_at(1002))
        .await
        .unwrap();
    assert_eq!(same.offs, None);

    layer
        .stor_node_edits(
            vec![NodeEdit::new(
                buid,
                "person",
                vec![SubEdit::NodeDataDel {
                    name: "notes".to_string(),
                    subs: vec![],
                }],
            )],
            meta_at(1003),
        )
        .await
        .unwrap();
    assert_eq!(layer.get_node_data(buid, "notes").unwrap(), None);
}

#[tokio::test]
async fn test_edits_on_missing_node_rejected() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);
    let bob = person_buid("bob");
    let ghost = person_buid("ghost");

    layer
        .stor_node_edits(vec![person_add("bob")], meta_at(1000))
        .await
        .unwrap();

    // Every state-attaching kind needs its node to exist first.
    let cases = vec![
        SubEdit::TagSet {
            tag: "vip".to_string(),
            ival: None,
            oldv: None,
            subs: vec![],
        },
        SubEdit::TagPropSet {
            tag: "vip".to_string(),
            prop: "score".to_string(),
            valu: Valu::Int(1),
            subs: vec![],
        },
        SubEdit::NodeDataSet {
            name: "notes".to_string(),
            data: vec![1],
            subs: vec![],
        },
        SubEdit::EdgeAdd {
            verb: "knows".to_string(),
            dst: bob,
            subs: vec![],
        },
    ];
    for sub in cases {
        let err = layer
            .stor_node_edits(
                vec![NodeEdit::new(ghost, "person", vec![sub])],
                meta_at(1001),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LayerError>(),
            Some(LayerError::BadEdit { .. })
        ));
    }

    assert_eq!(layer.get_node_tag(ghost, "vip").unwrap(), None);
    assert_eq!(layer.get_node_data(ghost, "notes").unwrap(), None);
    assert!(layer.edges_to(bob).unwrap().is_empty());
    assert_eq!(layer.edit_log_index(), 1);
}

#[tokio::test]
async fn test_unknown_form_rejected() {
    let dir = TempDir::new().unwrap();
    let layer = open_layer(&dir);

    let edit = NodeEdit::new(
        Buid::derive("robot", b"r2"),
        "robot",
        vec![SubEdit::NodeAdd {
            valu: Valu::Str("r2".to_string()),
            subs: vec![],
        }],
    );
    let err = layer
        .stor_node_edits(vec![edit], meta_at(1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayerError>(),
        Some(LayerError::NoSuchForm { .. })
    ));
}
