//! HTTP client for the hub API

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use crate::probe::{HealthRecord, Prober};
use crate::protocol::{
    CreatePropertyRequest, ErrorBody, HealthResponse, PersistRequest, PersistResponse,
    SetParentRequest,
};
use crate::topology::{NewNode, Node, NodeUpdate, Property};

use super::model::Mutation;

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");

        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a non-success response into an error carrying the hub's message
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        anyhow::bail!("HTTP {status}: {message}")
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("failed to send HTTP request")?;
        Self::check(response)
            .await?
            .json()
            .await
            .context("failed to parse response body")
    }

    async fn send_empty(request: RequestBuilder) -> Result<()> {
        let response = request.send().await.context("failed to send HTTP request")?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        Self::send_json(self.request(Method::GET, "/api/health")).await
    }

    /// Full state of every property
    pub async fn list_properties(&self) -> Result<Vec<Property>> {
        Self::send_json(self.request(Method::GET, "/api/properties")).await
    }

    pub async fn get_property(&self, id: &str) -> Result<Property> {
        Self::send_json(self.request(Method::GET, &format!("/api/properties/{id}"))).await
    }

    pub async fn create_property(&self, name: &str, image_ref: &str) -> Result<Property> {
        let body = CreatePropertyRequest {
            name: name.to_string(),
            image_ref: image_ref.to_string(),
        };
        Self::send_json(self.request(Method::POST, "/api/properties").json(&body)).await
    }

    pub async fn delete_property(&self, id: &str) -> Result<()> {
        Self::send_empty(self.request(Method::DELETE, &format!("/api/properties/{id}"))).await
    }

    /// Store a whole document as `<id>.json`
    pub async fn save_property(&self, property: &Property) -> Result<()> {
        let body = PersistRequest {
            filename: format!("{}.json", property.id),
            content: serde_json::to_value(property)?,
        };
        let response: PersistResponse =
            Self::send_json(self.request(Method::POST, "/api/properties/save").json(&body))
                .await?;

        if !response.success {
            anyhow::bail!("hub refused to save {}", property.id);
        }
        Ok(())
    }

    pub async fn add_node(&self, property_id: &str, node: &NewNode) -> Result<Node> {
        let path = format!("/api/properties/{property_id}/nodes");
        Self::send_json(self.request(Method::POST, &path).json(node)).await
    }

    pub async fn update_node(
        &self,
        property_id: &str,
        node_id: &str,
        update: &NodeUpdate,
    ) -> Result<Node> {
        let path = format!("/api/properties/{property_id}/nodes/{node_id}");
        Self::send_json(self.request(Method::PATCH, &path).json(update)).await
    }

    pub async fn delete_node(&self, property_id: &str, node_id: &str) -> Result<()> {
        let path = format!("/api/properties/{property_id}/nodes/{node_id}");
        Self::send_empty(self.request(Method::DELETE, &path)).await
    }

    /// Remove every node of a property
    pub async fn clear_nodes(&self, property_id: &str) -> Result<()> {
        let path = format!("/api/properties/{property_id}/nodes");
        Self::send_empty(self.request(Method::DELETE, &path)).await
    }

    pub async fn set_parent(
        &self,
        property_id: &str,
        node_id: &str,
        parent: Option<&str>,
    ) -> Result<Node> {
        let path = format!("/api/properties/{property_id}/nodes/{node_id}/parent");
        let body = SetParentRequest {
            parent: parent.map(str::to_string),
        };
        Self::send_json(self.request(Method::PUT, &path).json(&body)).await
    }

    pub async fn node_status(&self, address: &str) -> Result<HealthRecord> {
        Self::send_json(self.request(Method::GET, &format!("/api/node-status/{address}"))).await
    }

    /// Send a local edit produced by the client model
    pub async fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::MoveNode {
                property_id,
                node_id,
                x,
                y,
            } => {
                let update = NodeUpdate {
                    x: Some(*x),
                    y: Some(*y),
                    ..NodeUpdate::default()
                };
                self.update_node(property_id, node_id, &update).await?;
            }
            Mutation::SetParent {
                property_id,
                node_id,
                parent,
            } => {
                self.set_parent(property_id, node_id, parent.as_deref())
                    .await?;
            }
            Mutation::UpdateNode {
                property_id,
                node_id,
                update,
            } => {
                self.update_node(property_id, node_id, update).await?;
            }
            Mutation::DeleteNode {
                property_id,
                node_id,
            } => self.delete_node(property_id, node_id).await?,
            Mutation::ClearNodes { property_id } => self.clear_nodes(property_id).await?,
            Mutation::DeleteProperty { property_id } => self.delete_property(property_id).await?,
            Mutation::SaveProperty { property } => self.save_property(property).await?,
        }
        Ok(())
    }
}

/// Health lookups through the hub's cache
#[async_trait]
impl Prober for BackendClient {
    async fn probe(&self, address: &str) -> HealthRecord {
        match self.node_status(address).await {
            Ok(record) => record,
            Err(e) => {
                warn!("status of {address} unavailable: {e:#}");
                HealthRecord::unknown()
            }
        }
    }
}
