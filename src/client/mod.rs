//! Headless viewer client
//!
//! [`ClientTopologyModel`] is a pure state machine: pointer and keyboard input go in,
//! [`Mutation`]s come out and are sent to the hub by [`BackendClient`]. Remote change
//! messages are folded back in with [`ClientTopologyModel::apply_remote`].

pub mod backend;
pub mod interaction;
pub mod mirror;
pub mod model;
pub mod poller;
pub mod view;

#[cfg(feature = "viewer")]
pub mod config;
#[cfg(feature = "viewer")]
pub mod websocket;

pub use backend::BackendClient;
pub use interaction::{Interaction, PointerTarget};
pub use mirror::LocalMirror;
pub use model::{ClientTopologyModel, Mutation, SyncError};
pub use poller::{HealthUpdate, PollerHandle};
pub use view::{ImageSize, Point, ViewTransform};
