//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Change notifications flowing from the watcher to the broadcaster
//! 3. **Ordering**: Events travel through a single queue, so per-document order is
//!    detection order

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{ChangeKind, ChangeMessage};
use crate::topology::Property;

/// A document change detected in durable storage
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,

    pub document_id: String,

    /// Validated document for `add`/`change`
    pub content: Option<Property>,

    /// File the change was observed on
    pub path: PathBuf,
}

impl ChangeEvent {
    /// Wire form pushed to sync sessions
    pub fn to_message(&self) -> ChangeMessage {
        ChangeMessage {
            event: self.kind,
            document_id: self.document_id.clone(),
            content: self.content.clone(),
        }
    }
}

/// Commands that can be sent to the ChangeWatcherActor
#[derive(Debug)]
pub enum WatcherCommand {
    /// Rescan the data directory immediately
    ///
    /// Responds with the number of change events emitted by the scan.
    ScanNow {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Stop watching
    Shutdown,
}

/// A registered sync session
///
/// Dropping the receiver closes the session; the broadcaster removes it on the
/// next delivery attempt.
#[derive(Debug)]
pub struct Session {
    pub id: u64,

    /// Serialized change messages, in detection order
    pub receiver: mpsc::Receiver<String>,
}

/// Commands that can be sent to the BroadcasterActor
#[derive(Debug)]
pub enum BroadcastCommand {
    /// Add a session and hand back its message queue
    Register { respond_to: oneshot::Sender<Session> },

    /// Remove a session
    Unregister { id: u64 },

    /// Number of connected sessions
    SessionCount { respond_to: oneshot::Sender<usize> },

    /// Gracefully shut down the broadcaster
    Shutdown,
}
