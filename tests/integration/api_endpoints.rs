//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - REST endpoints return the documented status codes
//! - Authentication middleware accepts header and query tokens
//! - Raw document saves are validated and confined to the data directory
//! - Node status is served through the cache
//! - WebSocket sessions all see the same change stream

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use topomap::{
    actors::{BroadcastHandle, WatcherHandle},
    api::{ApiConfig, ApiState, spawn_api_server},
    probe::{HealthRecord, HealthStatus},
    status::StatusCache,
    store::TopologyStore,
    topology::{Node, Property},
};

use crate::helpers::{CountingProber, fast_watcher};

const TOKEN: &str = "test-token";

struct TestHub {
    addr: SocketAddr,
    dir: TempDir,
    broadcaster: BroadcastHandle,
    prober: Arc<CountingProber>,
    _watcher: WatcherHandle,
}

impl TestHub {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        reqwest::Client::new().get(self.url(path)).bearer_auth(TOKEN)
    }

    fn post(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
        reqwest::Client::new()
            .post(self.url(path))
            .bearer_auth(TOKEN)
            .json(&body)
    }

    async fn create_property(&self, name: &str) -> Property {
        let response = self
            .post("/api/properties", json!({"name": name, "imageRef": "map.png"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }

    async fn add_node(&self, property_id: &str, node_type: &str, x: f64, y: f64) -> Node {
        let response = self
            .post(
                &format!("/api/properties/{property_id}/nodes"),
                json!({"type": node_type, "x": x, "y": y}),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }
}

// Helper to create a test hub on a random port
async fn spawn_test_hub() -> TestHub {
    let dir = tempfile::tempdir().unwrap();
    let store = TopologyStore::open(dir.path()).await.unwrap();
    let prober = CountingProber::good(12.5);
    let status = StatusCache::new(prober.clone(), Duration::from_secs(30));

    let (event_tx, event_rx) = mpsc::channel(64);
    let broadcaster = BroadcastHandle::spawn(event_rx);
    let watcher = WatcherHandle::spawn(
        dir.path().to_path_buf(),
        store.clone(),
        event_tx,
        &fast_watcher(),
    )
    .await
    .unwrap();

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };
    let addr = spawn_api_server(config, ApiState::new(store, status, broadcaster.clone()))
        .await
        .unwrap();

    TestHub {
        addr,
        dir,
        broadcaster,
        prober,
        _watcher: watcher,
    }
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let hub = spawn_test_hub().await;

    let response = hub.get("/api/health").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_auth_rejects_missing_and_wrong_tokens() {
    let hub = spawn_test_hub().await;
    let client = reqwest::Client::new();

    let missing = client.get(hub.url("/api/properties")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].is_string());

    let wrong = client
        .get(hub.url("/api/properties"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let query = client
        .get(hub.url(&format!("/api/properties?token={TOKEN}")))
        .send()
        .await
        .unwrap();
    assert_eq!(query.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_property_lifecycle() {
    let hub = spawn_test_hub().await;

    let property = hub.create_property("Warehouse").await;
    assert_eq!(property.name, "Warehouse");
    assert!(hub.dir.path().join(format!("{}.json", property.id)).exists());

    let fetched: Property = hub
        .get(&format!("/api/properties/{}", property.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, property);

    let listed: Vec<Property> = hub
        .get("/api/properties")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, vec![property.clone()]);

    let deleted = reqwest::Client::new()
        .delete(hub.url(&format!("/api/properties/{}", property.id)))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = hub
        .get(&format!("/api/properties/{}", property.id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_property_requires_name() {
    let hub = spawn_test_hub().await;

    let response = hub
        .post("/api/properties", json!({"imageRef": "map.png"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_property_returns_404() {
    let hub = spawn_test_hub().await;

    let response = hub.get("/api/properties/does-not-exist").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_parent_cycle_is_rejected_with_conflict() {
    let hub = spawn_test_hub().await;
    let property = hub.create_property("Campus").await;
    let root = hub.add_node(&property.id, "root", 10.0, 10.0).await;
    let switch = hub.add_node(&property.id, "switch", 20.0, 20.0).await;
    let client = reqwest::Client::new();
    let parent_url = |node: &str| hub.url(&format!("/api/properties/{}/nodes/{node}/parent", property.id));

    let assigned = client
        .put(parent_url(&switch.id))
        .bearer_auth(TOKEN)
        .json(&json!({"parent": root.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(assigned.status(), StatusCode::OK);
    let node: Node = assigned.json().await.unwrap();
    assert_eq!(node.parent.as_deref(), Some(root.id.as_str()));

    let cycle = client
        .put(parent_url(&root.id))
        .bearer_auth(TOKEN)
        .json(&json!({"parent": switch.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(cycle.status(), StatusCode::CONFLICT);

    let stored: Property = hub
        .get(&format!("/api/properties/{}", property.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored.node(&root.id).unwrap().parent, None);
}

#[tokio::test]
async fn test_node_update_and_delete() {
    let hub = spawn_test_hub().await;
    let property = hub.create_property("Farm").await;
    let node = hub.add_node(&property.id, "ap", 50.0, 50.0).await;
    let client = reqwest::Client::new();
    let node_url = hub.url(&format!("/api/properties/{}/nodes/{}", property.id, node.id));

    let updated: Node = client
        .patch(&node_url)
        .bearer_auth(TOKEN)
        .json(&json!({"label": "silo", "ip": "10.1.1.1", "x": 75.5}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated.label, "silo");
    assert_eq!(updated.ip.as_deref(), Some("10.1.1.1"));
    assert_eq!(updated.x, 75.5);
    assert_eq!(updated.y, 50.0);

    let deleted = client.delete(&node_url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let again = client.delete(&node_url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_writes_canonical_document_to_basename() {
    let hub = spawn_test_hub().await;
    let content = json!({
        "id": "imported",
        "name": "Imported",
        "mapImage": "legacy.png",
        "nodes": {
            "n1": {"id": "n1", "type": "root", "x": 5, "y": 5, "label": "core", "ip": ""}
        }
    });

    let response = hub
        .post(
            "/api/properties/save",
            json!({"filename": "../../outside/imported.json", "content": content}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"success": true}));

    let written = std::fs::read_to_string(hub.dir.path().join("imported.json")).unwrap();
    let property = Property::from_json(&written).unwrap();
    assert_eq!(property.image_ref, "legacy.png");
    assert_eq!(property.node("n1").unwrap().ip, None);
    assert!(written.contains("\"imageRef\""));
}

#[tokio::test]
async fn test_clear_nodes_keeps_property() {
    let hub = spawn_test_hub().await;
    let property = hub.create_property("Depot").await;
    hub.add_node(&property.id, "root", 50.0, 50.0).await;
    hub.add_node(&property.id, "client", 60.0, 60.0).await;
    let client = reqwest::Client::new();
    let nodes_url = hub.url(&format!("/api/properties/{}/nodes", property.id));

    let cleared = client.delete(&nodes_url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    let stored: Property = hub
        .get(&format!("/api/properties/{}", property.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stored.nodes.is_empty());
    assert_eq!(stored.name, "Depot");

    let missing = client
        .delete(hub.url("/api/properties/nope/nodes"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_saved_under_new_name_then_deleted_stays_deleted() {
    let hub = spawn_test_hub().await;
    let property = hub.create_property("Office").await;

    let saved = hub
        .post(
            "/api/properties/save",
            json!({"filename": "Office.json", "content": property}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(saved.status(), StatusCode::OK);
    assert!(!hub.dir.path().join(format!("{}.json", property.id)).exists());

    let deleted = reqwest::Client::new()
        .delete(hub.url(&format!("/api/properties/{}", property.id)))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    assert_eq!(std::fs::read_dir(hub.dir.path()).unwrap().count(), 0);
    let reopened = TopologyStore::open(hub.dir.path()).await.unwrap();
    assert!(reopened.get(&property.id).await.is_err());
}

#[tokio::test]
async fn test_save_rejects_invalid_document() {
    let hub = spawn_test_hub().await;

    let response = hub
        .post(
            "/api/properties/save",
            json!({"filename": "broken.json", "content": {"id": "broken", "name": ""}}),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!hub.dir.path().join("broken.json").exists());
}

#[tokio::test]
async fn test_node_status_is_cached() {
    let hub = spawn_test_hub().await;

    for _ in 0..3 {
        let record: HealthRecord = hub
            .get("/api/node-status/10.0.0.9")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(record.status, HealthStatus::Good);
        assert_eq!(record.latency, Some(12.5));
    }

    assert_eq!(hub.prober.calls(), 1);
}

#[cfg(feature = "viewer")]
mod streaming {
    use super::*;
    use pretty_assertions::assert_eq;
    use futures::StreamExt;
    use tokio_tungstenite::{connect_async, tungstenite::Message};
    use topomap::protocol::{ChangeKind, ChangeMessage};

    type Stream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn open_session(hub: &TestHub) -> Stream {
        let url = format!("ws://{}/api/stream?token={TOKEN}", hub.addr);
        let (stream, _) = connect_async(url).await.unwrap();
        stream
    }

    async fn wait_for_sessions(hub: &TestHub, expected: usize) {
        tokio::time::timeout(crate::helpers::EVENT_TIMEOUT, async {
            while hub.broadcaster.session_count().await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sessions never registered");
    }

    async fn next_change(
        stream: &mut Stream,
        accept: impl Fn(&ChangeMessage) -> bool,
    ) -> ChangeMessage {
        tokio::time::timeout(crate::helpers::EVENT_TIMEOUT, async {
            loop {
                let frame = stream.next().await.expect("stream ended").unwrap();
                if let Message::Text(text) = frame {
                    let message: ChangeMessage = serde_json::from_str(&text).unwrap();
                    if accept(&message) {
                        return message;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for change message")
    }

    #[tokio::test]
    async fn test_every_session_sees_each_edit() {
        let hub = spawn_test_hub().await;
        let mut first = open_session(&hub).await;
        let mut second = open_session(&hub).await;
        wait_for_sessions(&hub, 2).await;

        let property = hub.create_property("Harbor").await;
        for stream in [&mut first, &mut second] {
            let message = next_change(stream, |m| m.document_id == property.id).await;
            assert_eq!(message.event, ChangeKind::Add);
        }

        let node = hub.add_node(&property.id, "cpe", 33.0, 66.0).await;
        for stream in [&mut first, &mut second] {
            let message = next_change(stream, |m| {
                m.content.as_ref().is_some_and(|p| p.node(&node.id).is_some())
            })
            .await;
            assert_eq!(message.event, ChangeKind::Change);
            assert_eq!(message.content.unwrap().node(&node.id), Some(&node));
        }

        std::fs::remove_file(hub.dir.path().join(format!("{}.json", property.id))).unwrap();
        for stream in [&mut first, &mut second] {
            let message = next_change(stream, |m| m.event == ChangeKind::Unlink).await;
            assert_eq!(message.document_id, property.id);
        }
    }

    #[tokio::test]
    async fn test_closed_session_is_unregistered() {
        let hub = spawn_test_hub().await;
        let mut stream = open_session(&hub).await;
        wait_for_sessions(&hub, 1).await;

        stream.close(None).await.unwrap();

        wait_for_sessions(&hub, 0).await;
    }
}
