//! BroadcasterActor - Fans change events out to sync sessions
//!
//! Events are taken from one queue, strictly in order. Each event is serialized once
//! and offered to every session before the next event is taken. Delivery is best
//! effort: a session whose queue is full misses that message, and a session whose
//! receiver is gone is dropped.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{BroadcastCommand, ChangeEvent, Session};

/// Messages buffered per session before it starts missing updates
pub const SESSION_QUEUE_SIZE: usize = 64;

pub struct BroadcasterActor {
    sessions: HashMap<u64, mpsc::Sender<String>>,

    next_session_id: u64,

    command_rx: mpsc::Receiver<BroadcastCommand>,

    event_rx: mpsc::Receiver<ChangeEvent>,
}

impl BroadcasterActor {
    pub fn new(
        command_rx: mpsc::Receiver<BroadcastCommand>,
        event_rx: mpsc::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            command_rx,
            event_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting broadcaster actor");

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(BroadcastCommand::Register { respond_to }) => {
                            let session = self.register();
                            let _ = respond_to.send(session);
                        }
                        Some(BroadcastCommand::Unregister { id }) => {
                            if self.sessions.remove(&id).is_some() {
                                debug!("session {id} unregistered");
                            }
                        }
                        Some(BroadcastCommand::SessionCount { respond_to }) => {
                            let _ = respond_to.send(self.sessions.len());
                        }
                        Some(BroadcastCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            debug!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    self.fan_out(&event);
                }
            }
        }

        debug!("broadcaster actor stopped");
    }

    fn register(&mut self) -> Session {
        let id = self.next_session_id;
        self.next_session_id += 1;

        let (tx, rx) = mpsc::channel(SESSION_QUEUE_SIZE);
        self.sessions.insert(id, tx);
        debug!("session {id} registered ({} total)", self.sessions.len());

        Session { id, receiver: rx }
    }

    fn fan_out(&mut self, event: &ChangeEvent) {
        let payload = match serde_json::to_string(&event.to_message()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize change for {}: {e}", event.document_id);
                return;
            }
        };

        let mut closed = Vec::new();
        for (id, session) in &self.sessions {
            match session.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("session {id} is lagging, dropping {} update", event.document_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.sessions.remove(&id);
            debug!("session {id} closed");
        }

        trace!(
            "delivered {:?} of {} to {} sessions",
            event.kind,
            event.document_id,
            self.sessions.len()
        );
    }
}

/// Handle for controlling a BroadcasterActor
#[derive(Clone)]
pub struct BroadcastHandle {
    sender: mpsc::Sender<BroadcastCommand>,
}

impl BroadcastHandle {
    /// Spawn the broadcaster, consuming change events from `event_rx`
    pub fn spawn(event_rx: mpsc::Receiver<ChangeEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = BroadcasterActor::new(cmd_rx, event_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Open a new session
    pub async fn register(&self) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BroadcastCommand::Register { respond_to: tx })
            .await
            .context("failed to send Register command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn unregister(&self, id: u64) -> Result<()> {
        self.sender
            .send(BroadcastCommand::Unregister { id })
            .await
            .context("failed to send Unregister command")?;
        Ok(())
    }

    pub async fn session_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BroadcastCommand::SessionCount { respond_to: tx })
            .await
            .context("failed to send SessionCount command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(BroadcastCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
