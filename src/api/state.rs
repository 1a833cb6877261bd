//! API shared state

use crate::actors::BroadcastHandle;
use crate::status::StatusCache;
use crate::store::TopologyStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Authoritative topology documents
    pub store: TopologyStore,

    /// Health records per probe address
    pub status: StatusCache,

    /// Handle to the broadcaster for opening sync sessions
    pub broadcaster: BroadcastHandle,
}

impl ApiState {
    pub fn new(store: TopologyStore, status: StatusCache, broadcaster: BroadcastHandle) -> Self {
        Self {
            store,
            status,
            broadcaster,
        }
    }
}
