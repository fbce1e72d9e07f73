//! Upstream sync tests: catchup, live tail, exact-offset resumability, and
//! cursor independence across sources.

mod common;

use std::sync::Arc;
use std::time::Duration;

use strata_db::layer::edit::{EditMeta, NodeEdit, SubEdit};
use strata_db::layer::model::{FormDef, Model};
use strata_db::layer::stortype::{StorType, Valu};
use strata_db::layer::sync::{spawn_sync_client, InProcSource, SyncClient, SyncConfig};
use strata_db::{Buid, Layer, SourceId};
use tempfile::TempDir;

fn test_model() -> Model {
    Model::new().with_form(FormDef::new("person", StorType::Utf8))
}

fn open_layer(dir: &TempDir, name: &str) -> Arc<Layer> {
    common::init_tracing();
    Layer::open(&dir.path().join(name), test_model(), Default::default()).unwrap()
}

fn person_buid(name: &str) -> Buid {
    Buid::derive("person", name.as_bytes())
}

fn person_add(name: &str) -> Vec<NodeEdit> {
    vec![NodeEdit::new(
        person_buid(name),
        "person",
        vec![SubEdit::NodeAdd {
            valu: Valu::Str(name.to_string()),
            subs: vec![],
        }],
    )]
}

fn mirror(downstream: Arc<Layer>, upstream: Arc<Layer>, source: SourceId) -> SyncClient {
    SyncClient::new(
        downstream,
        Arc::new(InProcSource::new(upstream)),
        source,
        SyncConfig::default(),
    )
}

async fn wait_ingested(layer: &Layer, source: SourceId, offs: u64) {
    tokio::time::timeout(Duration::from_secs(5), layer.wait_upstream_offs(source, offs))
        .await
        .expect("sync did not catch up in time")
        .unwrap();
}

#[tokio::test]
async fn test_catchup_then_live() {
    let dir = TempDir::new().unwrap();
    let upstream = open_layer(&dir, "up");
    let downstream = open_layer(&dir, "down");
    let source = SourceId::new();

    // Three entries exist before the client ever connects.
    for name in ["a", "b", "c"] {
        upstream
            .stor_node_edits(person_add(name), EditMeta::default())
            .await
            .unwrap();
    }

    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 2).await;

    for name in ["a", "b", "c"] {
        assert_eq!(
            downstream.get_node_valu(person_buid(name)).unwrap(),
            Some(Valu::Str(name.to_string()))
        );
    }
    assert_eq!(downstream.cursor(source).unwrap(), 3);

    // Live tail: a commit after catchup flows through the notification path.
    upstream
        .stor_node_edits(person_add("d"), EditMeta::default())
        .await
        .unwrap();
    wait_ingested(&downstream, source, 3).await;
    assert_eq!(
        downstream.get_node_valu(person_buid("d")).unwrap(),
        Some(Valu::Str("d".to_string()))
    );

    handle.abort();
}

#[tokio::test]
async fn test_resume_at_exactly_next_offset() {
    let dir = TempDir::new().unwrap();
    let upstream = open_layer(&dir, "up");
    let downstream = open_layer(&dir, "down");
    let source = SourceId::new();

    for i in 0..3u64 {
        upstream
            .stor_node_edits(person_add(&format!("user{}", i)), EditMeta::default())
            .await
            .unwrap();
    }

    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 2).await;
    handle.abort();

    // More history accrues while the client is down.
    for i in 3..5u64 {
        upstream
            .stor_node_edits(person_add(&format!("user{}", i)), EditMeta::default())
            .await
            .unwrap();
    }

    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 4).await;
    handle.abort();

    assert_eq!(downstream.cursor(source).unwrap(), 5);
    for i in 0..5u64 {
        assert!(downstream
            .get_node_valu(person_buid(&format!("user{}", i)))
            .unwrap()
            .is_some());
    }
    // One local log entry per upstream entry: nothing was replayed twice.
    assert_eq!(downstream.edit_log_index(), 5);
}

#[tokio::test]
async fn test_multi_upstream_cursors_independent() {
    let dir = TempDir::new().unwrap();
    let up_a = open_layer(&dir, "up_a");
    let up_b = open_layer(&dir, "up_b");
    let downstream = open_layer(&dir, "down");
    let source_a = SourceId::new();
    let source_b = SourceId::new();

    for i in 0..3u64 {
        up_a.stor_node_edits(person_add(&format!("a{}", i)), EditMeta::default())
            .await
            .unwrap();
    }
    up_b.stor_node_edits(person_add("b0"), EditMeta::default())
        .await
        .unwrap();

    let handle_a = spawn_sync_client(mirror(downstream.clone(), up_a.clone(), source_a));
    let handle_b = spawn_sync_client(mirror(downstream.clone(), up_b.clone(), source_b));
    wait_ingested(&downstream, source_a, 2).await;
    wait_ingested(&downstream, source_b, 0).await;
    handle_a.abort();
    handle_b.abort();

    // Each cursor tracks its own source's log, not the combined ingest.
    assert_eq!(downstream.cursor(source_a).unwrap(), 3);
    assert_eq!(downstream.cursor(source_b).unwrap(), 1);
    assert_eq!(downstream.edit_log_index(), 4);
    assert!(downstream.get_node_valu(person_buid("a2")).unwrap().is_some());
    assert!(downstream.get_node_valu(person_buid("b0")).unwrap().is_some());
}

#[tokio::test]
async fn test_truncate_resets_cursors() {
    let dir = TempDir::new().unwrap();
    let upstream = open_layer(&dir, "up");
    let downstream = open_layer(&dir, "down");
    let source = SourceId::new();

    for name in ["a", "b"] {
        upstream
            .stor_node_edits(person_add(name), EditMeta::default())
            .await
            .unwrap();
    }
    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 1).await;
    handle.abort();
    assert_eq!(downstream.cursor(source).unwrap(), 2);

    downstream.truncate().await.unwrap();
    assert_eq!(downstream.cursor(source).unwrap(), 0);
    assert_eq!(downstream.edit_log_index(), 0);

    // A fresh client re-pulls from offset zero; no-op diffing means the
    // replay changes nothing but the cursor and the local log.
    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 1).await;
    handle.abort();
    assert_eq!(downstream.cursor(source).unwrap(), 2);
}

#[tokio::test]
async fn test_wait_observes_commits_before_first_subscriber() {
    let dir = TempDir::new().unwrap();
    let upstream = open_layer(&dir, "up");
    let downstream = open_layer(&dir, "down");
    let source = SourceId::new();

    for name in ["a", "b"] {
        upstream
            .stor_node_edits(person_add(name), EditMeta::default())
            .await
            .unwrap();
    }
    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));

    // Poll the durable cursor directly so no watch channel exists while the
    // entries are ingested.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while downstream.cursor(source).unwrap() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "sync did not catch up in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();

    // The first subscription arrives after the commits; it must still
    // resolve from the durable cursor instead of blocking for a later one.
    tokio::time::timeout(
        Duration::from_millis(500),
        downstream.wait_upstream_offs(source, 1),
    )
    .await
    .expect("wait should observe the already-advanced cursor")
    .unwrap();
}

#[tokio::test]
async fn test_noop_replay_advances_cursor_without_logging() {
    let dir = TempDir::new().unwrap();
    let upstream = open_layer(&dir, "up");
    let downstream = open_layer(&dir, "down");
    let source = SourceId::new();

    // The downstream already has the node the upstream entry would add, at
    // the same commit time, so the replayed edits are pure no-ops.
    let meta = EditMeta {
        user: None,
        time: Some(strata_db::TimestampMilli(1000)),
        prov: None,
    };
    upstream
        .stor_node_edits(person_add("shared"), meta.clone())
        .await
        .unwrap();
    downstream
        .stor_node_edits(person_add("shared"), meta)
        .await
        .unwrap();
    assert_eq!(downstream.edit_log_index(), 1);

    let handle = spawn_sync_client(mirror(downstream.clone(), upstream.clone(), source));
    wait_ingested(&downstream, source, 0).await;
    handle.abort();

    // Cursor advanced, but the no-op replay appended nothing locally.
    assert_eq!(downstream.cursor(source).unwrap(), 1);
    assert_eq!(downstream.edit_log_index(), 1);
}
