//! Actor-based change propagation
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   data directory ──notify/poll──▶ ChangeWatcherActor ──absorb──▶ TopologyStore
//!                                          │
//!                                          │ mpsc<ChangeEvent> (single queue)
//!                                          ▼
//!                                   BroadcasterActor
//!                                          │ try_send per session
//!                          ┌───────────────┼───────────────┐
//!                          ▼               ▼               ▼
//!                      session 1       session 2       session N
//!                     (WebSocket)     (WebSocket)     (WebSocket)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Change events flow through one bounded queue, preserving order
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod broadcaster;
pub mod messages;
pub mod watcher;

pub use broadcaster::BroadcastHandle;
pub use messages::{ChangeEvent, Session};
pub use watcher::WatcherHandle;
