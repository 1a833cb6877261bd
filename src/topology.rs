//! Topology documents
//!
//! A [`Property`] is one mapped site: a background image reference plus a forest of
//! [`Node`]s positioned in percent coordinates relative to the image.
//!
//! ## Invariants
//!
//! - Nodes live in an arena keyed by id; the key always equals the node's own id
//! - The `parent` relation is a forest: acyclic, at most one parent per node
//! - Connections are derived from `parent` pointers and never stored; a pointer to a
//!   node that does not exist simply yields no edge
//!
//! Every ingestion path (disk, import, network payload) goes through
//! [`Property::from_json`] or [`Property::validate`], so externally supplied structure
//! is never trusted as already valid.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::error::{StorageError, TopologyError, TopologyResult, ValidationError};

pub type PropertyId = String;
pub type NodeId = String;

/// Monotonic component of generated node ids
static NODE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a node id from the wall clock and a process-wide counter
///
/// The counter keeps ids unique even when several nodes are created within the
/// same millisecond.
pub fn next_node_id() -> NodeId {
    let counter = NODE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("node_{}_{}", Utc::now().timestamp_millis(), counter)
}

/// Device role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Root,
    Ap,
    Switch,
    Cpe,
    Client,
    Router,
    Custom,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::Root,
        NodeType::Ap,
        NodeType::Switch,
        NodeType::Cpe,
        NodeType::Client,
        NodeType::Router,
        NodeType::Custom,
    ];

    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::Ap => "ap",
            NodeType::Switch => "switch",
            NodeType::Cpe => "cpe",
            NodeType::Client => "client",
            NodeType::Router => "router",
            NodeType::Custom => "custom",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device placed on the site map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Horizontal position in percent of the image width
    pub x: f64,

    /// Vertical position in percent of the image height
    pub y: f64,

    #[serde(default)]
    pub label: String,

    /// Probe address; an empty string on the wire reads as absent
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ip: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent: Option<NodeId>,
}

/// Fields accepted when adding a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Partial edit of a node; absent fields are left untouched
///
/// `ip: Some("")` clears the address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// One network-map document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: PropertyId,

    pub name: String,

    /// Opaque reference to the background image
    #[serde(alias = "mapImage")]
    pub image_ref: String,

    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,

    /// Reserved; round-tripped verbatim but never consulted
    #[serde(default)]
    pub connections: Vec<serde_json::Value>,
}

/// A derived parent -> child connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge<'a> {
    pub parent: &'a Node,
    pub child: &'a Node,
}

impl Property {
    /// Create an empty property with a freshly generated id
    pub fn new(name: &str, image_ref: &str) -> Result<Self, ValidationError> {
        let property = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            image_ref: image_ref.to_string(),
            nodes: BTreeMap::new(),
            connections: Vec::new(),
        };
        property.validate()?;
        Ok(property)
    }

    /// Parse and validate a document
    pub fn from_json(text: &str) -> TopologyResult<Self> {
        let property: Property = serde_json::from_str(text)?;
        property.validate()?;
        Ok(property)
    }

    /// Serialize in the human-readable layout used on disk and for export
    pub fn to_json_pretty(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every structural rule of the document
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.image_ref.trim().is_empty() {
            return Err(ValidationError::MissingField("imageRef"));
        }

        for (key, node) in &self.nodes {
            if node.id.is_empty() {
                return Err(ValidationError::MissingField("node.id"));
            }
            if key != &node.id {
                return Err(ValidationError::IdMismatch {
                    key: key.clone(),
                    id: node.id.clone(),
                });
            }
            check_coordinate("x", node.x)?;
            check_coordinate("y", node.y)?;
        }

        self.check_forest()
    }

    /// Reject any parent chain that revisits a node
    fn check_forest(&self) -> Result<(), ValidationError> {
        for node in self.nodes.values() {
            let mut visited = HashSet::new();
            visited.insert(node.id.as_str());

            let mut cursor = node.parent.as_deref();
            for _ in 0..self.nodes.len() {
                let Some(id) = cursor else { break };
                let Some(ancestor) = self.nodes.get(id) else { break };
                if !visited.insert(ancestor.id.as_str()) {
                    return Err(ValidationError::CycleDetected {
                        node: node.id.clone(),
                        parent: node.parent.clone().unwrap_or_default(),
                    });
                }
                cursor = ancestor.parent.as_deref();
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn node_mut(&mut self, id: &str) -> TopologyResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TopologyError::not_found("node", id))
    }

    /// Add a node built from `new`, generating its id
    pub fn insert_node(&mut self, new: NewNode) -> Result<Node, ValidationError> {
        check_coordinate("x", new.x)?;
        check_coordinate("y", new.y)?;

        let id = next_node_id();
        if self.nodes.contains_key(&id) {
            return Err(ValidationError::DuplicateId(id));
        }

        let label = new
            .label
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}", new.node_type, self.nodes.len() + 1));

        let node = Node {
            id: id.clone(),
            node_type: new.node_type,
            x: new.x,
            y: new.y,
            label,
            ip: normalize_address(new.ip),
            parent: None,
        };
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    /// Whether making `parent_id` the parent of `node_id` would close a loop
    ///
    /// Walks the ancestor chain from `parent_id`, bounded by the node count. A chain
    /// that does not terminate within that bound already contains a loop and is
    /// treated as one.
    pub fn would_cycle(&self, node_id: &str, parent_id: &str) -> bool {
        if node_id == parent_id {
            return true;
        }

        let mut cursor = Some(parent_id);
        for _ in 0..self.nodes.len() {
            match cursor {
                Some(id) if id == node_id => return true,
                Some(id) => cursor = self.nodes.get(id).and_then(|n| n.parent.as_deref()),
                None => return false,
            }
        }
        cursor.is_some()
    }

    /// Point `node_id` at `parent_id`, or detach it when `parent_id` is `None`
    pub fn set_parent(&mut self, node_id: &str, parent_id: Option<&str>) -> TopologyResult<Node> {
        if !self.nodes.contains_key(node_id) {
            return Err(TopologyError::not_found("node", node_id));
        }

        if let Some(parent_id) = parent_id {
            if !self.nodes.contains_key(parent_id) {
                return Err(TopologyError::not_found("node", parent_id));
            }
            if self.would_cycle(node_id, parent_id) {
                return Err(ValidationError::CycleDetected {
                    node: node_id.to_string(),
                    parent: parent_id.to_string(),
                }
                .into());
            }
        }

        let node = self.node_mut(node_id)?;
        node.parent = parent_id.map(str::to_string);
        Ok(node.clone())
    }

    /// Apply label, address and position edits
    pub fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> TopologyResult<Node> {
        if let Some(x) = update.x {
            check_coordinate("x", x)?;
        }
        if let Some(y) = update.y {
            check_coordinate("y", y)?;
        }

        let node = self.node_mut(node_id)?;
        if let Some(label) = update.label {
            node.label = label;
        }
        if let Some(ip) = update.ip {
            node.ip = normalize_address(Some(ip));
        }
        if let Some(x) = update.x {
            node.x = x;
        }
        if let Some(y) = update.y {
            node.y = y;
        }
        Ok(node.clone())
    }

    /// Remove a node; children are orphaned, not deleted
    pub fn remove_node(&mut self, node_id: &str) -> TopologyResult<Node> {
        let removed = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| TopologyError::not_found("node", node_id))?;

        for node in self.nodes.values_mut() {
            if node.parent.as_deref() == Some(node_id) {
                node.parent = None;
            }
        }
        Ok(removed)
    }

    /// Remove every node, returning how many were dropped
    pub fn clear_nodes(&mut self) -> usize {
        let count = self.nodes.len();
        self.nodes.clear();
        count
    }

    /// Derived parent -> child connections
    pub fn edges(&self) -> impl Iterator<Item = Edge<'_>> {
        self.nodes.values().filter_map(|child| {
            let parent = self.nodes.get(child.parent.as_deref()?)?;
            Some(Edge { parent, child })
        })
    }

    /// Distinct probe addresses of all nodes
    pub fn addresses(&self) -> BTreeSet<&str> {
        self.nodes
            .values()
            .filter_map(|node| node.ip.as_deref())
            .collect()
    }
}

fn check_coordinate(axis: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidCoordinate { axis, value })
    }
}

fn normalize_address(address: Option<String>) -> Option<String> {
    address
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_address(value))
}

// ============================================================================
// Tests
// ============================================================================
