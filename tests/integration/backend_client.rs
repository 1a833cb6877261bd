//! Integration tests for the viewer's HTTP client against a mock hub

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use topomap::{
    client::{BackendClient, Mutation},
    probe::{HealthStatus, Prober},
    topology::Property,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn property_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Depot",
        "imageRef": "depot.png",
        "nodes": {
            "n1": {"id": "n1", "type": "router", "x": 10.0, "y": 20.0, "label": "core", "ip": "10.0.0.1", "parent": null}
        },
        "connections": []
    })
}

#[tokio::test]
async fn test_list_properties_sends_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/properties"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([property_json("depot")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = BackendClient::new(&server.uri(), Some("secret".to_string()));
    let properties = client.list_properties().await.unwrap();

    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].id, "depot");
    assert_eq!(properties[0].node("n1").unwrap().ip.as_deref(), Some("10.0.0.1"));
}

#[tokio::test]
async fn test_error_body_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/properties/depot/nodes/n1/parent"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "assigning n2 as parent of n1 would create a cycle"})),
        )
        .mount(&server)
        .await;

    let client = BackendClient::new(&server.uri(), None);
    let err = client.set_parent("depot", "n1", Some("n2")).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("409"), "{message}");
    assert!(message.contains("cycle"), "{message}");
}

#[tokio::test]
async fn test_move_mutation_patches_position() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/properties/depot/nodes/n1"))
        .and(body_partial_json(json!({"x": 42.0, "y": 17.5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "n1", "type": "router", "x": 42.0, "y": 17.5, "label": "core", "ip": null, "parent": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BackendClient::new(&server.uri(), None);
    client
        .apply(&Mutation::MoveNode {
            property_id: "depot".to_string(),
            node_id: "n1".to_string(),
            x: 42.0,
            y: 17.5,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_clear_nodes_mutation_deletes_node_collection() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/properties/depot/nodes"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = BackendClient::new(&server.uri(), None);
    client
        .apply(&Mutation::ClearNodes {
            property_id: "depot".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_save_uses_document_id_as_filename() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/properties/save"))
        .and(body_partial_json(json!({"filename": "depot.json", "content": {"id": "depot"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let property: Property = serde_json::from_value(property_json("depot")).unwrap();
    let client = BackendClient::new(&format!("{}/", server.uri()), None);

    client.save_property(&property).await.unwrap();
}

#[tokio::test]
async fn test_status_lookup_through_hub() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/node-status/10.0.0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "warning", "latency": 140.2, "loss": 0.0, "lastCheck": "2024-05-01T12:00:00Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/node-status/10.0.0.2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = BackendClient::new(&server.uri(), None);

    let record = client.probe("10.0.0.1").await;
    assert_eq!(record.status, HealthStatus::Warning);
    assert_eq!(record.latency, Some(140.2));

    let unreachable = client.probe("10.0.0.2").await;
    assert_matches!(unreachable.status, HealthStatus::Unknown);
}
