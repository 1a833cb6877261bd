//! Wire types shared by the hub and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topology::{NodeId, Property};

/// Kind of change detected on a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

/// Message pushed to every sync session
///
/// `content` is the full document for `add`/`change` and absent for `unlink`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub event: ChangeKind,

    #[serde(rename = "documentId")]
    pub document_id: String,

    #[serde(default)]
    pub content: Option<Property>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePropertyRequest {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "mapImage")]
    pub image_ref: String,
}

/// Body of a parent assignment; `null` detaches the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetParentRequest {
    pub parent: Option<NodeId>,
}

/// Raw document save
///
/// `content` may be the document object itself or a string holding its JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistRequest {
    pub filename: String,
    pub content: serde_json::Value,
}

impl PersistRequest {
    /// The document as JSON text
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub sessions: usize,
    pub cached_addresses: usize,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
