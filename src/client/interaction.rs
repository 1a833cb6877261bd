//! Pointer gesture state of the active map

use crate::topology::NodeId;

use super::view::Point;

/// What the pointer was pressed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    Background,
    Node(NodeId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Interaction {
    #[default]
    Idle,

    /// Moving the map; `grab` is the pointer position minus the pan offset at press time
    Panning { grab: Point },

    /// Moving a node; positions are local until release
    DraggingNode { node_id: NodeId, moved: bool },

    /// Connect mode on, waiting for the parent node
    Connecting,

    /// Parent chosen, waiting for the child node
    ConnectingFrom(NodeId),
}

impl Interaction {
    /// Whether a gesture has local changes not yet committed
    ///
    /// Remote replacements of the working copy are deferred while this holds.
    pub fn is_uncommitted(&self) -> bool {
        matches!(
            self,
            Interaction::DraggingNode { .. } | Interaction::ConnectingFrom(_)
        )
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Interaction::Connecting | Interaction::ConnectingFrom(_))
    }
}
