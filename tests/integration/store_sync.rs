//! Integration tests for change detection and fan-out
//!
//! These tests verify that:
//! - Files written by anyone reach every session as change messages
//! - Store mutations are echoed back through the watcher
//! - Half-written documents are skipped until they become valid

use crate::helpers::{document, fast_watcher, next_message};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio::sync::mpsc;
use topomap::{
    actors::{BroadcastHandle, WatcherHandle},
    protocol::ChangeKind,
    store::TopologyStore,
    topology::{NewNode, NodeType},
};

struct Pipeline {
    store: TopologyStore,
    watcher: WatcherHandle,
    broadcaster: BroadcastHandle,
}

async fn spawn_pipeline(dir: &std::path::Path) -> Pipeline {
    let store = TopologyStore::open(dir).await.unwrap();
    let (event_tx, event_rx) = mpsc::channel(64);
    let broadcaster = BroadcastHandle::spawn(event_rx);
    let watcher = WatcherHandle::spawn(dir.to_path_buf(), store.clone(), event_tx, &fast_watcher())
        .await
        .unwrap();

    Pipeline {
        store,
        watcher,
        broadcaster,
    }
}

#[tokio::test]
async fn test_external_file_reaches_every_session() {
    let dir = tempdir().unwrap();
    let pipeline = spawn_pipeline(dir.path()).await;
    let mut first = pipeline.broadcaster.register().await.unwrap();
    let mut second = pipeline.broadcaster.register().await.unwrap();

    std::fs::write(dir.path().join("barn.json"), document("barn", "Barn")).unwrap();

    for session in [&mut first, &mut second] {
        let message = next_message(&mut session.receiver, |m| m.document_id == "barn").await;
        assert_eq!(message.event, ChangeKind::Add);
        assert_eq!(message.content.unwrap().name, "Barn");
    }
    assert_eq!(pipeline.store.get("barn").await.unwrap().name, "Barn");

    pipeline.watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_store_mutation_is_echoed_to_sessions() {
    let dir = tempdir().unwrap();
    let pipeline = spawn_pipeline(dir.path()).await;
    let mut session = pipeline.broadcaster.register().await.unwrap();

    let property = pipeline.store.create("Office", "office.png").await.unwrap();
    let node = pipeline
        .store
        .add_node(
            &property.id,
            NewNode {
                node_type: NodeType::Router,
                x: 40.0,
                y: 60.0,
                label: None,
                ip: Some("192.168.1.1".to_string()),
            },
        )
        .await
        .unwrap();

    // Both writes may be folded into one scan; wait for the state that has the node
    let message = next_message(&mut session.receiver, |m| {
        m.content
            .as_ref()
            .is_some_and(|p| p.node(&node.id).is_some())
    })
    .await;

    assert_eq!(message.document_id, property.id);
    assert_eq!(message.content.unwrap().node(&node.id), Some(&node));

    pipeline.watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_half_written_document_is_skipped_until_valid() {
    let dir = tempdir().unwrap();
    let pipeline = spawn_pipeline(dir.path()).await;
    let mut session = pipeline.broadcaster.register().await.unwrap();
    let path = dir.path().join("site.json");

    std::fs::write(&path, r#"{"id": "site", "na"#).unwrap();
    assert_eq!(pipeline.watcher.scan_now().await.unwrap(), 0);
    assert!(pipeline.store.get("site").await.is_err());

    std::fs::write(&path, document("site", "Site")).unwrap();
    let message = next_message(&mut session.receiver, |m| m.document_id == "site").await;

    assert_eq!(message.event, ChangeKind::Add);
    assert!(pipeline.store.get("site").await.is_ok());

    pipeline.watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_file_unlinks_document() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("shed.json"), document("shed", "Shed")).unwrap();
    let pipeline = spawn_pipeline(dir.path()).await;
    let mut session = pipeline.broadcaster.register().await.unwrap();

    std::fs::remove_file(dir.path().join("shed.json")).unwrap();
    let message = next_message(&mut session.receiver, |m| m.document_id == "shed").await;

    assert_eq!(message.event, ChangeKind::Unlink);
    assert!(message.content.is_none());
    assert!(pipeline.store.get("shed").await.unwrap_err().is_not_found());

    pipeline.watcher.shutdown().await.unwrap();
}
