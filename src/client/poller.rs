//! StatusPollerActor - Centralized health polling for the viewer
//!
//! One actor polls every distinct visible address once per tick, instead of each
//! node polling on its own timer. Results are published to the app loop.
//!
//! The address set travels over a `watch` channel: publishing it never waits on
//! the actor, so the app loop cannot stall behind a poll that is itself waiting
//! for the app loop to drain updates. Only the latest set matters.
//!
//! ```text
//! Timer tick → probe each address (concurrently) → HealthUpdate → app loop
//!     ↑
//!     ├─── Address set (watch)
//!     └─── Commands (PollNow, Shutdown)
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace};

use crate::probe::{HealthRecord, Prober};

/// Health of one address, as published to the app loop
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub address: String,
    pub record: HealthRecord,
}

#[derive(Debug)]
pub enum PollerCommand {
    /// Poll immediately; responds with the number of addresses polled
    PollNow { respond_to: oneshot::Sender<usize> },

    Shutdown,
}

pub struct StatusPollerActor {
    source: Arc<dyn Prober>,
    addresses: BTreeSet<String>,
    addresses_rx: watch::Receiver<BTreeSet<String>>,
    interval_duration: Duration,
    command_rx: mpsc::Receiver<PollerCommand>,
    update_tx: mpsc::Sender<HealthUpdate>,
}

impl StatusPollerActor {
    pub fn new(
        source: Arc<dyn Prober>,
        interval_duration: Duration,
        addresses_rx: watch::Receiver<BTreeSet<String>>,
        command_rx: mpsc::Receiver<PollerCommand>,
        update_tx: mpsc::Sender<HealthUpdate>,
    ) -> Self {
        Self {
            source,
            addresses: BTreeSet::new(),
            addresses_rx,
            interval_duration,
            command_rx,
            update_tx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting status poller");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; new addresses are polled on arrival
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll().await;
                }

                changed = self.addresses_rx.changed() => {
                    if changed.is_err() {
                        debug!("address publisher dropped, stopping");
                        break;
                    }
                    // Newly visible addresses get a status without waiting a full tick
                    if self.take_addresses() > 0 {
                        self.poll().await;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::PollNow { respond_to }) => {
                            if self.addresses_rx.has_changed().unwrap_or(false) {
                                self.take_addresses();
                            }
                            let polled = self.poll().await;
                            let _ = respond_to.send(polled);
                        }
                        Some(PollerCommand::Shutdown) | None => {
                            debug!("status poller stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Adopt the latest published set, returning how many addresses are new
    fn take_addresses(&mut self) -> usize {
        let latest = self.addresses_rx.borrow_and_update().clone();
        let added = latest.difference(&self.addresses).count();
        self.addresses = latest;
        added
    }

    async fn poll(&self) -> usize {
        if self.addresses.is_empty() {
            return 0;
        }

        let probes = self.addresses.iter().map(|address| {
            let source = Arc::clone(&self.source);
            async move {
                let record = source.probe(address).await;
                HealthUpdate {
                    address: address.clone(),
                    record,
                }
            }
        });
        let updates = join_all(probes).await;
        let polled = updates.len();

        for update in updates {
            if self.update_tx.send(update).await.is_err() {
                trace!("update receiver dropped");
                break;
            }
        }
        polled
    }
}

/// Handle for controlling a StatusPollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
    addresses: Arc<watch::Sender<BTreeSet<String>>>,
}

impl PollerHandle {
    pub fn spawn(
        source: Arc<dyn Prober>,
        interval_duration: Duration,
        update_tx: mpsc::Sender<HealthUpdate>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (addresses_tx, addresses_rx) = watch::channel(BTreeSet::new());
        let actor =
            StatusPollerActor::new(source, interval_duration, addresses_rx, cmd_rx, update_tx);
        tokio::spawn(actor.run());
        Self {
            sender: cmd_tx,
            addresses: Arc::new(addresses_tx),
        }
    }

    /// Replace the set of addresses to poll; never waits on the actor
    ///
    /// Returns whether the set changed. An unchanged set does not wake the actor.
    pub fn set_addresses(&self, addresses: BTreeSet<String>) -> bool {
        self.addresses.send_if_modified(|current| {
            if *current == addresses {
                return false;
            }
            *current = addresses;
            true
        })
    }

    pub async fn poll_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
