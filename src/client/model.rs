//! Client-side topology model
//!
//! A single-threaded state machine holding the property index, the active map
//! view and the latest health records. It performs no I/O: local edits are applied
//! optimistically and returned as [`Mutation`]s for the caller to send to the hub,
//! and pushes from the hub are fed back in through [`ClientTopologyModel::apply_remote`].
//!
//! ## Reconciliation
//!
//! A remote `add`/`change` replaces the cached copy of the document. For the active
//! document the working copy is replaced wholesale, unless a gesture is in flight
//! (a node drag or a half-made connection). In that case the newest remote copy is
//! held back and applied when the gesture ends, with the gesture's own result
//! re-applied on top.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, trace, warn};

use crate::probe::HealthRecord;
use crate::protocol::{ChangeKind, ChangeMessage};
use crate::store::{TopologyError, TopologyResult, ValidationError};
use crate::topology::{NodeId, NodeUpdate, Property, PropertyId};

use super::interaction::{Interaction, PointerTarget};
use super::view::{ImageSize, Point, ViewTransform};

/// A local edit to be sent to the hub
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    MoveNode {
        property_id: PropertyId,
        node_id: NodeId,
        x: f64,
        y: f64,
    },
    SetParent {
        property_id: PropertyId,
        node_id: NodeId,
        parent: Option<NodeId>,
    },
    UpdateNode {
        property_id: PropertyId,
        node_id: NodeId,
        update: NodeUpdate,
    },
    DeleteNode {
        property_id: PropertyId,
        node_id: NodeId,
    },
    /// Remove every node, keeping the property
    ClearNodes {
        property_id: PropertyId,
    },
    DeleteProperty {
        property_id: PropertyId,
    },
    /// Store a whole document (import)
    SaveProperty {
        property: Property,
    },
}

impl Mutation {
    pub fn property_id(&self) -> &str {
        match self {
            Mutation::MoveNode { property_id, .. }
            | Mutation::SetParent { property_id, .. }
            | Mutation::UpdateNode { property_id, .. }
            | Mutation::DeleteNode { property_id, .. }
            | Mutation::ClearNodes { property_id }
            | Mutation::DeleteProperty { property_id } => property_id,
            Mutation::SaveProperty { property } => &property.id,
        }
    }

    /// Replay a node-level edit on a copy of its document
    fn replay(&self, property: &mut Property) -> TopologyResult<()> {
        match self {
            Mutation::MoveNode { node_id, x, y, .. } => {
                let update = NodeUpdate {
                    x: Some(*x),
                    y: Some(*y),
                    ..NodeUpdate::default()
                };
                property.update_node(node_id, update)?;
            }
            Mutation::SetParent {
                node_id, parent, ..
            } => {
                property.set_parent(node_id, parent.as_deref())?;
            }
            Mutation::UpdateNode {
                node_id, update, ..
            } => {
                property.update_node(node_id, update.clone())?;
            }
            Mutation::DeleteNode { node_id, .. } => {
                property.remove_node(node_id)?;
            }
            Mutation::ClearNodes { .. } => {
                property.clear_nodes();
            }
            Mutation::DeleteProperty { .. } | Mutation::SaveProperty { .. } => {}
        }
        Ok(())
    }
}

/// Problems with pushes received from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    MalformedEvent(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::MalformedEvent(msg) => write!(f, "malformed change event: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// The property currently shown on the map
#[derive(Debug, Clone)]
pub struct ActiveView {
    pub working: Property,
    pub transform: ViewTransform,
    pub image: ImageSize,
    pub interaction: Interaction,
    pub show_connections: bool,
    pub selected: Option<NodeId>,

    /// Newest remote copy received during an uncommitted gesture
    deferred: Option<Property>,
}

impl ActiveView {
    fn new(working: Property, image: ImageSize) -> Self {
        Self {
            working,
            transform: ViewTransform::default(),
            image,
            interaction: Interaction::Idle,
            show_connections: true,
            selected: None,
            deferred: None,
        }
    }

    pub fn property_id(&self) -> &str {
        &self.working.id
    }

    /// Pixel position of a node under the current transform
    pub fn node_position(&self, node_id: &str) -> Option<Point> {
        let node = self.working.node(node_id)?;
        Some(self.transform.to_pixel(Point::new(node.x, node.y), self.image))
    }

    fn replace_working(&mut self, property: Property) {
        self.working = property;
        if let Some(selected) = &self.selected
            && self.working.node(selected).is_none()
        {
            self.selected = None;
        }
    }

    /// End the current gesture, folding in any deferred remote copy
    ///
    /// `committed` is the gesture's own edit; it is replayed on top of the remote
    /// copy so the result of the gesture survives until the hub echoes it.
    fn finish_gesture(&mut self, committed: Option<&Mutation>) {
        self.interaction = Interaction::Idle;

        let Some(mut remote) = self.deferred.take() else {
            return;
        };
        if let Some(mutation) = committed
            && let Err(e) = mutation.replay(&mut remote)
        {
            debug!("local edit no longer applies to remote copy: {e}");
        }
        self.replace_working(remote);
    }
}

pub struct ClientTopologyModel {
    properties: BTreeMap<PropertyId, Property>,
    active: Option<ActiveView>,
    health: HashMap<String, HealthRecord>,
    image: ImageSize,
}

impl ClientTopologyModel {
    /// An invalid image size falls back to the default
    pub fn new(image: ImageSize) -> Self {
        let image = match image.validate() {
            Ok(()) => image,
            Err(e) => {
                warn!("{e}, using default image size");
                ImageSize::default()
            }
        };
        Self {
            properties: BTreeMap::new(),
            active: None,
            health: HashMap::new(),
            image,
        }
    }

    // ========================================================================
    // Index
    // ========================================================================

    /// Replace the index with a full snapshot
    ///
    /// Invalid documents are skipped. The active view survives if its document is
    /// still present. Returns the number of documents skipped.
    pub fn load_index(&mut self, snapshot: Vec<Property>) -> usize {
        let mut skipped = 0;
        self.properties.clear();
        for property in snapshot {
            match property.validate() {
                Ok(()) => {
                    self.properties.insert(property.id.clone(), property);
                }
                Err(e) => {
                    warn!("skipping invalid property {}: {e}", property.id);
                    skipped += 1;
                }
            }
        }

        if let Some(active) = &mut self.active {
            match self.properties.get(active.property_id()) {
                Some(fresh) if active.interaction.is_uncommitted() => {
                    active.deferred = Some(fresh.clone());
                }
                Some(fresh) => active.replace_working(fresh.clone()),
                None => self.active = None,
            }
        }
        skipped
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.get(id)
    }

    /// Documents as they should be mirrored locally, including uncommitted edits
    pub fn snapshot(&self) -> Vec<Property> {
        self.properties
            .values()
            .map(|property| match &self.active {
                Some(active) if active.property_id() == property.id => active.working.clone(),
                _ => property.clone(),
            })
            .collect()
    }

    // ========================================================================
    // Active view
    // ========================================================================

    /// Show a property on the map; returns false if it is unknown
    pub fn open(&mut self, id: &str) -> bool {
        let Some(property) = self.properties.get(id) else {
            return false;
        };
        self.active = Some(ActiveView::new(property.clone(), self.image));
        true
    }

    pub fn close(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&ActiveView> {
        self.active.as_ref()
    }

    fn active_mut(&mut self) -> Result<&mut ActiveView, ValidationError> {
        self.active.as_mut().ok_or(ValidationError::NoActiveDocument)
    }

    /// Image size reported once the background has loaded
    ///
    /// A size that is not positive in both dimensions is rejected and the previous
    /// size kept.
    pub fn set_image_size(&mut self, image: ImageSize) -> Result<(), ValidationError> {
        image.validate()?;
        self.image = image;
        if let Some(active) = &mut self.active {
            active.image = image;
        }
        Ok(())
    }

    pub fn toggle_connections(&mut self) {
        if let Some(active) = &mut self.active {
            active.show_connections = !active.show_connections;
        }
    }

    pub fn wheel(&mut self, delta_y: f64) {
        if let Some(active) = &mut self.active {
            active.transform.wheel(delta_y);
        }
    }

    pub fn zoom_in(&mut self) {
        if let Some(active) = &mut self.active {
            active.transform.zoom_in();
        }
    }

    pub fn zoom_out(&mut self) {
        if let Some(active) = &mut self.active {
            active.transform.zoom_out();
        }
    }

    pub fn reset_view(&mut self) {
        if let Some(active) = &mut self.active {
            active.transform.reset();
        }
    }

    // ========================================================================
    // Pointer gestures
    // ========================================================================

    pub fn pointer_down(
        &mut self,
        position: Point,
        target: PointerTarget,
    ) -> Result<Option<Mutation>, ValidationError> {
        let active = self.active_mut()?;

        if let PointerTarget::Node(id) = &target
            && active.working.node(id).is_none()
        {
            trace!("pointer down on unknown node {id}");
            return Ok(None);
        }

        match (active.interaction.clone(), target) {
            (Interaction::Idle, PointerTarget::Background) => {
                active.selected = None;
                active.interaction = Interaction::Panning {
                    grab: position - active.transform.pan,
                };
                Ok(None)
            }
            (Interaction::Idle, PointerTarget::Node(node_id)) => {
                active.selected = Some(node_id.clone());
                active.interaction = Interaction::DraggingNode {
                    node_id,
                    moved: false,
                };
                Ok(None)
            }
            (Interaction::Connecting, PointerTarget::Node(parent)) => {
                active.interaction = Interaction::ConnectingFrom(parent);
                Ok(None)
            }
            (Interaction::ConnectingFrom(parent), PointerTarget::Node(child)) => {
                if parent == child {
                    return Ok(None);
                }
                if active.working.would_cycle(&child, &parent) {
                    return Err(ValidationError::CycleDetected {
                        node: child,
                        parent,
                    });
                }

                let mutation = Mutation::SetParent {
                    property_id: active.working.id.clone(),
                    node_id: child,
                    parent: Some(parent),
                };
                if let Err(e) = mutation.replay(&mut active.working) {
                    warn!("connection could not be applied: {e}");
                    return Ok(None);
                }
                active.finish_gesture(Some(&mutation));
                self.commit_active();
                Ok(Some(mutation))
            }
            _ => Ok(None),
        }
    }

    pub fn pointer_move(&mut self, position: Point) {
        let Some(active) = &mut self.active else {
            return;
        };

        match &mut active.interaction {
            Interaction::Panning { grab } => {
                active.transform.pan = position - *grab;
            }
            Interaction::DraggingNode { node_id, moved } => {
                let percent = active.transform.to_percent(position, active.image);
                if !(percent.x.is_finite() && percent.y.is_finite()) {
                    trace!("ignoring drag to {position:?}");
                    return;
                }
                if let Some(node) = active.working.nodes.get_mut(node_id.as_str()) {
                    node.x = percent.x.clamp(0.0, 100.0);
                    node.y = percent.y.clamp(0.0, 100.0);
                    *moved = true;
                }
            }
            _ => {}
        }
    }

    /// Release the pointer, committing a node drag as a single move
    pub fn pointer_up(&mut self) -> Option<Mutation> {
        let active = self.active.as_mut()?;

        match active.interaction.clone() {
            Interaction::Panning { .. } => {
                active.interaction = Interaction::Idle;
                None
            }
            Interaction::DraggingNode { node_id, moved } => {
                let mutation = active
                    .working
                    .node(&node_id)
                    .filter(|_| moved)
                    .map(|node| Mutation::MoveNode {
                        property_id: active.working.id.clone(),
                        node_id: node.id.clone(),
                        x: node.x,
                        y: node.y,
                    });

                active.finish_gesture(mutation.as_ref());
                if mutation.is_some() {
                    self.commit_active();
                }
                mutation
            }
            _ => None,
        }
    }

    /// Enter or leave connect mode
    pub fn toggle_connect_mode(&mut self) {
        let Some(active) = &mut self.active else {
            return;
        };

        match active.interaction {
            Interaction::Idle => active.interaction = Interaction::Connecting,
            Interaction::Connecting | Interaction::ConnectingFrom(_) => {
                active.finish_gesture(None);
            }
            _ => {}
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    pub fn select(&mut self, node_id: Option<&str>) {
        if let Some(active) = &mut self.active {
            active.selected = node_id
                .filter(|id| active.working.node(id).is_some())
                .map(str::to_string);
        }
    }

    /// Edit the label or address of the selected node
    pub fn update_selected(&mut self, update: NodeUpdate) -> TopologyResult<Mutation> {
        let active = self.active_mut()?;
        let node_id = active
            .selected
            .clone()
            .ok_or(ValidationError::MissingField("selected node"))?;

        let mutation = Mutation::UpdateNode {
            property_id: active.working.id.clone(),
            node_id,
            update,
        };
        self.apply_local(&mutation)?;
        Ok(mutation)
    }

    /// Delete a node of the active property; its children are orphaned
    pub fn delete_node(&mut self, node_id: &str) -> TopologyResult<Mutation> {
        let active = self.active_mut()?;
        let mutation = Mutation::DeleteNode {
            property_id: active.working.id.clone(),
            node_id: node_id.to_string(),
        };
        self.apply_local(&mutation)?;

        if let Some(active) = &mut self.active
            && active.selected.as_deref() == Some(node_id)
        {
            active.selected = None;
        }
        Ok(mutation)
    }

    /// Remove every node of the active property
    pub fn clear_all_nodes(&mut self) -> TopologyResult<Mutation> {
        let active = self.active_mut()?;
        let mutation = Mutation::ClearNodes {
            property_id: active.working.id.clone(),
        };
        self.apply_local(&mutation)?;

        if let Some(active) = &mut self.active {
            active.selected = None;
            if let Interaction::ConnectingFrom(_) = active.interaction {
                active.interaction = Interaction::Connecting;
            }
        }
        Ok(mutation)
    }

    pub fn delete_property(&mut self, id: &str) -> TopologyResult<Mutation> {
        if self.properties.remove(id).is_none() {
            return Err(TopologyError::not_found("property", id));
        }
        if self.active.as_ref().is_some_and(|a| a.property_id() == id) {
            self.active = None;
        }
        Ok(Mutation::DeleteProperty {
            property_id: id.to_string(),
        })
    }

    /// Apply an edit to the working copy and the index
    fn apply_local(&mut self, mutation: &Mutation) -> TopologyResult<()> {
        let active = self.active_mut()?;
        let mut draft = active.working.clone();
        mutation.replay(&mut draft)?;
        draft.validate()?;

        active.working = draft;
        self.commit_active();
        Ok(())
    }

    fn commit_active(&mut self) {
        if let Some(active) = &self.active {
            self.properties
                .insert(active.working.id.clone(), active.working.clone());
        }
    }

    // ========================================================================
    // Remote changes
    // ========================================================================

    /// Decode and apply one raw push from the hub
    pub fn apply_remote_text(&mut self, text: &str) -> Result<(), SyncError> {
        let message: ChangeMessage =
            serde_json::from_str(text).map_err(|e| SyncError::MalformedEvent(e.to_string()))?;
        self.apply_remote(message)
    }

    pub fn apply_remote(&mut self, message: ChangeMessage) -> Result<(), SyncError> {
        match message.event {
            ChangeKind::Add | ChangeKind::Change => {
                let property = message.content.ok_or_else(|| {
                    SyncError::MalformedEvent(format!("{} without content", message.document_id))
                })?;
                if property.id != message.document_id {
                    return Err(SyncError::MalformedEvent(format!(
                        "document {} carries id {}",
                        message.document_id, property.id
                    )));
                }
                property
                    .validate()
                    .map_err(|e| SyncError::MalformedEvent(e.to_string()))?;

                if let Some(active) = &mut self.active
                    && active.property_id() == property.id
                {
                    if active.interaction.is_uncommitted() {
                        trace!("deferring remote copy of {} until gesture ends", property.id);
                        active.deferred = Some(property.clone());
                    } else {
                        active.replace_working(property.clone());
                    }
                }
                self.properties.insert(property.id.clone(), property);
            }
            ChangeKind::Unlink => {
                self.properties.remove(&message.document_id);
                if self
                    .active
                    .as_ref()
                    .is_some_and(|a| a.property_id() == message.document_id)
                {
                    debug!("active property {} was removed", message.document_id);
                    self.active = None;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Connection lines of the active view in device pixels (parent, child)
    pub fn edges(&self) -> Vec<(Point, Point)> {
        let Some(active) = self.active.as_ref().filter(|a| a.show_connections) else {
            return Vec::new();
        };

        active
            .working
            .edges()
            .map(|edge| {
                (
                    active
                        .transform
                        .to_pixel(Point::new(edge.parent.x, edge.parent.y), active.image),
                    active
                        .transform
                        .to_pixel(Point::new(edge.child.x, edge.child.y), active.image),
                )
            })
            .collect()
    }

    /// Distinct probe addresses of the nodes on the active map
    pub fn visible_addresses(&self) -> BTreeSet<String> {
        self.active
            .as_ref()
            .map(|active| {
                active
                    .working
                    .addresses()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn record_health(&mut self, address: &str, record: HealthRecord) {
        self.health.insert(address.to_string(), record);
    }

    /// Latest health of `address`; unknown until the first poll lands
    pub fn health(&self, address: &str) -> HealthRecord {
        self.health.get(address).cloned().unwrap_or_default()
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// The active property as pretty JSON
    pub fn export_active(&self) -> TopologyResult<String> {
        let active = self.active.as_ref().ok_or(ValidationError::NoActiveDocument)?;
        Ok(active.working.to_json_pretty()?)
    }

    /// Add a property from exported JSON, replacing any copy with the same id
    pub fn import_property(&mut self, text: &str) -> TopologyResult<Mutation> {
        let property = Property::from_json(text)?;

        if let Some(active) = &mut self.active
            && active.property_id() == property.id
        {
            active.replace_working(property.clone());
        }
        self.properties.insert(property.id.clone(), property.clone());

        Ok(Mutation::SaveProperty { property })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::HealthStatus;
    use crate::topology::{NewNode, NodeType};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const IMAGE: ImageSize = ImageSize::new(800.0, 600.0);

    fn add(property: &mut Property, node_type: NodeType, x: f64, y: f64, ip: Option<&str>) -> NodeId {
        property
            .insert_node(NewNode {
                node_type,
                x,
                y,
                label: None,
                ip: ip.map(str::to_string),
            })
            .unwrap()
            .id
    }

    /// Model with one open property holding a root and a client
    fn fixture() -> (ClientTopologyModel, PropertyId, NodeId, NodeId) {
        let mut property = Property::new("Office", "office.png").unwrap();
        let root = add(&mut property, NodeType::Root, 50.0, 50.0, Some("10.0.0.1"));
        let client = add(&mut property, NodeType::Client, 60.0, 60.0, Some("10.0.0.2"));
        let id = property.id.clone();

        let mut model = ClientTopologyModel::new(IMAGE);
        model.load_index(vec![property]);
        assert!(model.open(&id));
        (model, id, root, client)
    }

    fn change(property: &Property) -> ChangeMessage {
        ChangeMessage {
            event: ChangeKind::Change,
            document_id: property.id.clone(),
            content: Some(property.clone()),
        }
    }

    #[test]
    fn test_operations_require_active_document() {
        let mut model = ClientTopologyModel::new(IMAGE);
        assert_matches!(
            model.pointer_down(Point::default(), PointerTarget::Background),
            Err(ValidationError::NoActiveDocument)
        );
        assert!(model.export_active().is_err());
        assert!(!model.open("missing"));
    }

    #[test]
    fn test_drag_commits_one_clamped_move() {
        let (mut model, id, root, _) = fixture();

        let start = model.active().unwrap().node_position(&root).unwrap();
        model
            .pointer_down(start, PointerTarget::Node(root.clone()))
            .unwrap();
        model.pointer_move(Point::new(200.0, 150.0));
        model.pointer_move(Point::new(5000.0, -40.0));
        let mutation = model.pointer_up();

        assert_eq!(
            mutation,
            Some(Mutation::MoveNode {
                property_id: id.clone(),
                node_id: root.clone(),
                x: 100.0,
                y: 0.0,
            })
        );
        let stored = model.property(&id).unwrap().node(&root).unwrap();
        assert_eq!((stored.x, stored.y), (100.0, 0.0));
        assert_eq!(model.active().unwrap().interaction, Interaction::Idle);
    }

    #[test]
    fn test_click_without_move_commits_nothing() {
        let (mut model, _, root, _) = fixture();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();

        assert_eq!(model.pointer_up(), None);
        assert_eq!(model.active().unwrap().selected, Some(root));
    }

    #[test]
    fn test_background_press_clears_selection() {
        let (mut model, _, root, _) = fixture();
        model.select(Some(&root));

        model
            .pointer_down(Point::new(5.0, 5.0), PointerTarget::Background)
            .unwrap();

        assert_eq!(model.active().unwrap().selected, None);
        assert_matches!(model.active().unwrap().interaction, Interaction::Panning { .. });
        assert_eq!(model.pointer_up(), None);
    }

    #[test]
    fn test_clear_all_nodes_empties_active_map() {
        let (mut model, id, root, client) = fixture();
        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model
            .pointer_down(Point::default(), PointerTarget::Node(client.clone()))
            .unwrap();
        model.select(Some(&client));

        let mutation = model.clear_all_nodes().unwrap();

        assert_eq!(
            mutation,
            Mutation::ClearNodes {
                property_id: id.clone(),
            }
        );
        let active = model.active().unwrap();
        assert!(active.working.nodes.is_empty());
        assert_eq!(active.selected, None);
        assert!(model.property(&id).unwrap().nodes.is_empty());
        assert_eq!(model.property(&id).unwrap().name, "Office");
        assert!(model.edges().is_empty());
        assert!(model.visible_addresses().is_empty());
    }

    #[test]
    fn test_clear_all_nodes_requires_active_document() {
        let mut model = ClientTopologyModel::new(IMAGE);
        assert_matches!(
            model.clear_all_nodes(),
            Err(TopologyError::Validation(ValidationError::NoActiveDocument))
        );
    }

    #[test]
    fn test_panning_moves_offset() {
        let (mut model, ..) = fixture();
        model
            .pointer_down(Point::new(100.0, 100.0), PointerTarget::Background)
            .unwrap();
        model.pointer_move(Point::new(130.0, 80.0));
        assert_eq!(model.pointer_up(), None);

        assert_eq!(model.active().unwrap().transform.pan, Point::new(30.0, -20.0));
    }

    #[test]
    fn test_connect_flow_sets_parent() {
        let (mut model, id, root, client) = fixture();

        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        // Pressing the chosen parent again changes nothing
        assert_eq!(
            model
                .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
                .unwrap(),
            None
        );
        let mutation = model
            .pointer_down(Point::default(), PointerTarget::Node(client.clone()))
            .unwrap();

        assert_eq!(
            mutation,
            Some(Mutation::SetParent {
                property_id: id.clone(),
                node_id: client.clone(),
                parent: Some(root.clone()),
            })
        );
        assert_eq!(model.active().unwrap().interaction, Interaction::Idle);
        assert_eq!(
            model.property(&id).unwrap().node(&client).unwrap().parent,
            Some(root)
        );
    }

    #[test]
    fn test_connect_cycle_is_rejected_and_state_kept() {
        let (mut model, _, root, client) = fixture();
        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model
            .pointer_down(Point::default(), PointerTarget::Node(client.clone()))
            .unwrap();

        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(client.clone()))
            .unwrap();
        let result = model.pointer_down(Point::default(), PointerTarget::Node(root.clone()));

        assert_matches!(result, Err(ValidationError::CycleDetected { .. }));
        assert_eq!(
            model.active().unwrap().interaction,
            Interaction::ConnectingFrom(client)
        );

        model.toggle_connect_mode();
        assert_eq!(model.active().unwrap().interaction, Interaction::Idle);
    }

    #[test]
    fn test_remote_change_is_deferred_during_drag() {
        let (mut model, id, root, client) = fixture();
        let mut remote = model.property(&id).unwrap().clone();
        remote.nodes.get_mut(&client).unwrap().label = "renamed".to_string();

        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model.pointer_move(Point::new(80.0, 60.0));
        model.apply_remote(change(&remote)).unwrap();

        // Working copy untouched mid-gesture
        assert_eq!(model.active().unwrap().working.node(&client).unwrap().label, "client-2");

        model.pointer_up().unwrap();

        let working = &model.active().unwrap().working;
        assert_eq!(working.node(&client).unwrap().label, "renamed");
        assert_eq!(working.node(&root).unwrap().x, 10.0);
        assert_eq!(working.node(&root).unwrap().y, 10.0);
    }

    #[test]
    fn test_remote_change_replaces_idle_working_copy() {
        let (mut model, id, _, client) = fixture();
        let mut remote = model.property(&id).unwrap().clone();
        remote.remove_node(&client).unwrap();
        model.select(Some(&client));

        model.apply_remote(change(&remote)).unwrap();

        let active = model.active().unwrap();
        assert!(active.working.node(&client).is_none());
        assert_eq!(active.selected, None);
    }

    #[test]
    fn test_unlink_clears_active_view() {
        let (mut model, id, ..) = fixture();

        model
            .apply_remote(ChangeMessage {
                event: ChangeKind::Unlink,
                document_id: id.clone(),
                content: None,
            })
            .unwrap();

        assert!(model.active().is_none());
        assert!(model.property(&id).is_none());
    }

    #[test]
    fn test_malformed_events_are_rejected() {
        let (mut model, id, root, client) = fixture();
        let mut looped = model.property(&id).unwrap().clone();
        looped.nodes.get_mut(&root).unwrap().parent = Some(client.clone());
        looped.nodes.get_mut(&client).unwrap().parent = Some(root.clone());

        assert_matches!(
            model.apply_remote(change(&looped)),
            Err(SyncError::MalformedEvent(_))
        );
        assert_matches!(
            model.apply_remote_text("{\"event\": \"change\"}"),
            Err(SyncError::MalformedEvent(_))
        );
        assert_matches!(
            model.apply_remote(ChangeMessage {
                event: ChangeKind::Add,
                document_id: "other".to_string(),
                content: model.property(&id).cloned(),
            }),
            Err(SyncError::MalformedEvent(_))
        );
        assert_eq!(model.property(&id).unwrap().node(&root).unwrap().parent, None);
    }

    #[test]
    fn test_edges_in_pixels() {
        let (mut model, _, root, client) = fixture();
        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root))
            .unwrap();
        model
            .pointer_down(Point::default(), PointerTarget::Node(client))
            .unwrap();
        model.zoom_in();
        model.reset_view();
        {
            let active = model.active.as_mut().unwrap();
            active.transform = ViewTransform {
                pan: Point::new(10.0, 20.0),
                scale: 2.0,
            };
        }

        assert_eq!(
            model.edges(),
            vec![(Point::new(810.0, 620.0), Point::new(970.0, 740.0))]
        );

        model.toggle_connections();
        assert!(model.edges().is_empty());
    }

    #[test]
    fn test_office_edge_at_unit_scale() {
        let mut property = Property::new("Office", "office.png").unwrap();
        let root = add(&mut property, NodeType::Root, 50.0, 50.0, None);
        let client = add(&mut property, NodeType::Client, 60.0, 60.0, None);
        property.set_parent(&client, Some(&root)).unwrap();
        let id = property.id.clone();

        let mut model = ClientTopologyModel::new(ImageSize::new(1000.0, 800.0));
        model.load_index(vec![property]);
        assert!(model.open(&id));

        assert_eq!(
            model.edges(),
            vec![(Point::new(500.0, 400.0), Point::new(600.0, 480.0))]
        );
    }

    #[test]
    fn test_invalid_image_size_is_rejected() {
        let (mut model, _, root, _) = fixture();

        assert_matches!(
            model.set_image_size(ImageSize::new(0.0, 600.0)),
            Err(ValidationError::InvalidImageSize { axis: "image width", .. })
        );
        assert_matches!(
            model.set_image_size(ImageSize::new(800.0, f64::NAN)),
            Err(ValidationError::InvalidImageSize { axis: "image height", .. })
        );
        assert_eq!(model.active().unwrap().image, IMAGE);

        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model.pointer_move(Point::new(400.0, 300.0));
        let node = model.active().unwrap().working.node(&root).unwrap();
        assert!(node.x.is_finite() && node.y.is_finite());

        let fallback = ClientTopologyModel::new(ImageSize::new(0.0, 0.0));
        assert_eq!(fallback.image, ImageSize::default());

        model.set_image_size(ImageSize::new(1000.0, 800.0)).unwrap();
        assert_eq!(model.active().unwrap().image, ImageSize::new(1000.0, 800.0));
    }

    #[test]
    fn test_drag_ignores_non_finite_positions() {
        let (mut model, id, root, _) = fixture();
        let before = model.property(&id).unwrap().node(&root).unwrap().clone();

        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model.pointer_move(Point::new(f64::NAN, 10.0));

        assert_eq!(model.pointer_up(), None);
        assert_eq!(model.property(&id).unwrap().node(&root).unwrap(), &before);
    }

    #[test]
    fn test_delete_node_orphans_children() {
        let (mut model, id, root, client) = fixture();
        model.toggle_connect_mode();
        model
            .pointer_down(Point::default(), PointerTarget::Node(root.clone()))
            .unwrap();
        model
            .pointer_down(Point::default(), PointerTarget::Node(client.clone()))
            .unwrap();

        let mutation = model.delete_node(&root).unwrap();

        assert_eq!(
            mutation,
            Mutation::DeleteNode {
                property_id: id.clone(),
                node_id: root,
            }
        );
        assert_eq!(model.property(&id).unwrap().node(&client).unwrap().parent, None);
        assert!(model.edges().is_empty());
    }

    #[test]
    fn test_update_selected_requires_selection() {
        let (mut model, id, root, _) = fixture();
        let update = NodeUpdate {
            ip: Some(String::new()),
            ..NodeUpdate::default()
        };
        assert!(model.update_selected(update.clone()).is_err());

        model.select(Some(&root));
        model.update_selected(update).unwrap();

        assert_eq!(model.property(&id).unwrap().node(&root).unwrap().ip, None);
    }

    #[test]
    fn test_visible_addresses_and_health() {
        let (mut model, id, _, _) = fixture();
        let mut property = model.property(&id).unwrap().clone();
        add(&mut property, NodeType::Cpe, 1.0, 1.0, Some("10.0.0.1"));
        model.apply_remote(change(&property)).unwrap();

        let addresses: Vec<_> = model.visible_addresses().into_iter().collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);

        assert_eq!(model.health("10.0.0.1").status, HealthStatus::Unknown);
        model.record_health("10.0.0.1", HealthRecord::failed(chrono::Utc::now()));
        assert_eq!(model.health("10.0.0.1").status, HealthStatus::Error);
    }

    #[test]
    fn test_export_import_round_trip() {
        let (mut model, id, ..) = fixture();
        let exported = model.export_active().unwrap();

        model.delete_property(&id).unwrap();
        let mutation = model.import_property(&exported).unwrap();

        assert_matches!(mutation, Mutation::SaveProperty { ref property } if property.id == id);
        assert_eq!(
            model.property(&id).unwrap().to_json_pretty().unwrap(),
            exported
        );
    }
}
