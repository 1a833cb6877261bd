//! ChangeWatcherActor - Detects document changes in the data directory
//!
//! ## Detection
//!
//! OS notifications (via `notify`) only wake the actor. After a short settle delay
//! the actor drains further wake-ups and rescans the whole directory, comparing each
//! document against a fingerprint table. A periodic rescan runs as well, so changes
//! are still picked up when no notification backend is available.
//!
//! ## Message Flow
//!
//! ```text
//! notify / ticker → rescan → ChangeEvent → TopologyStore::absorb → broadcaster queue
//!     ↑
//!     └─── Commands (ScanNow, Shutdown)
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::WatcherConfig;
use crate::protocol::ChangeKind;
use crate::store::TopologyStore;
use crate::store::disk::is_document_path;
use crate::topology::Property;

use super::messages::{ChangeEvent, WatcherCommand};

/// Last observed state of one file
#[derive(Debug, Clone)]
struct Fingerprint {
    hash: u64,

    /// Id of the last valid document read from the file
    document_id: Option<String>,
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn init_watcher(wake_tx: mpsc::Sender<()>, dir: &Path) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
        Ok(_) => {
            // A full queue already guarantees a pending rescan
            let _ = wake_tx.try_send(());
        }
        Err(e) => warn!("watch error: {e}"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Actor that turns file changes into change events
pub struct ChangeWatcherActor {
    dir: PathBuf,

    store: TopologyStore,

    /// Queue consumed by the broadcaster
    event_tx: mpsc::Sender<ChangeEvent>,

    command_rx: mpsc::Receiver<WatcherCommand>,

    /// Wake-ups from the OS notification backend
    wake_rx: mpsc::Receiver<()>,

    fingerprints: HashMap<PathBuf, Fingerprint>,

    poll_interval: Duration,

    settle: Duration,

    /// Kept alive for as long as the actor runs
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeWatcherActor {
    pub fn new(
        dir: PathBuf,
        store: TopologyStore,
        event_tx: mpsc::Sender<ChangeEvent>,
        command_rx: mpsc::Receiver<WatcherCommand>,
        config: &WatcherConfig,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let watcher = match init_watcher(wake_tx, &dir) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("file notifications unavailable, relying on periodic rescans: {e}");
                None
            }
        };

        Self {
            dir,
            store,
            event_tx,
            command_rx,
            wake_rx,
            fingerprints: HashMap::new(),
            poll_interval: config.poll_interval(),
            settle: config.settle(),
            _watcher: watcher,
        }
    }

    /// Record the current directory contents without emitting anything
    pub async fn seed(&mut self) -> Result<()> {
        self.scan(false).await?;
        debug!("seeded {} fingerprints", self.fingerprints.len());
        Ok(())
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn run(mut self) {
        info!("watching for document changes");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the directory was just seeded
        ticker.tick().await;

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(WatcherCommand::ScanNow { respond_to }) => {
                            let result = self.scan(true).await;
                            let _ = respond_to.send(result);
                        }
                        Some(WatcherCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            debug!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(()) = self.wake_rx.recv() => {
                    tokio::time::sleep(self.settle).await;
                    while self.wake_rx.try_recv().is_ok() {}
                    self.rescan().await;
                }

                _ = ticker.tick() => {
                    self.rescan().await;
                }
            }
        }

        debug!("watcher actor stopped");
    }

    async fn rescan(&mut self) {
        match self.scan(true).await {
            Ok(0) => {}
            Ok(n) => trace!("rescan emitted {n} events"),
            Err(e) => warn!("rescan failed: {e:#}"),
        }
    }

    /// Compare the directory against the fingerprint table
    ///
    /// Returns the number of events forwarded to the broadcaster.
    async fn scan(&mut self, emit: bool) -> Result<usize> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_document_path(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for path in paths {
            seen.insert(path.clone());

            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to read {}: {e}", path.display());
                    continue;
                }
            };

            let hash = fingerprint(&bytes);
            let previous = self.fingerprints.get(&path);
            if previous.is_some_and(|fp| fp.hash == hash) {
                continue;
            }
            let previous_id = previous.and_then(|fp| fp.document_id.clone());

            let parsed = std::str::from_utf8(&bytes)
                .map_err(anyhow::Error::from)
                .and_then(|text| Property::from_json(text).map_err(anyhow::Error::from));

            let property = match parsed {
                Ok(property) => property,
                Err(e) => {
                    // Reconsidered once the content changes again
                    warn!("skipping {}: {e}", path.display());
                    self.fingerprints.insert(
                        path,
                        Fingerprint {
                            hash,
                            document_id: previous_id,
                        },
                    );
                    continue;
                }
            };

            let id = property.id.clone();
            match previous_id {
                Some(old) if old != id => {
                    events.push(ChangeEvent {
                        kind: ChangeKind::Unlink,
                        document_id: old,
                        content: None,
                        path: path.clone(),
                    });
                    events.push(ChangeEvent {
                        kind: ChangeKind::Add,
                        document_id: id.clone(),
                        content: Some(property),
                        path: path.clone(),
                    });
                }
                Some(_) => events.push(ChangeEvent {
                    kind: ChangeKind::Change,
                    document_id: id.clone(),
                    content: Some(property),
                    path: path.clone(),
                }),
                None => events.push(ChangeEvent {
                    kind: ChangeKind::Add,
                    document_id: id.clone(),
                    content: Some(property),
                    path: path.clone(),
                }),
            }

            self.fingerprints.insert(
                path,
                Fingerprint {
                    hash,
                    document_id: Some(id),
                },
            );
        }

        let vanished: Vec<PathBuf> = self
            .fingerprints
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in vanished {
            if let Some(Fingerprint {
                document_id: Some(id),
                ..
            }) = self.fingerprints.remove(&path)
            {
                events.push(ChangeEvent {
                    kind: ChangeKind::Unlink,
                    document_id: id,
                    content: None,
                    path,
                });
            }
        }

        if !emit {
            return Ok(0);
        }

        let mut emitted = 0;
        for event in events {
            if self.dispatch(event).await? {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    /// Fold the event into the store, then queue it for broadcast
    async fn dispatch(&self, event: ChangeEvent) -> Result<bool> {
        debug!(kind = ?event.kind, document = %event.document_id, "detected change");

        let Some(event) = self.store.absorb(event).await else {
            return Ok(false);
        };

        self.event_tx
            .send(event)
            .await
            .context("broadcast queue closed")?;
        Ok(true)
    }
}

/// Handle for controlling a ChangeWatcherActor
#[derive(Clone)]
pub struct WatcherHandle {
    sender: mpsc::Sender<WatcherCommand>,
}

impl WatcherHandle {
    /// Seed the fingerprint table from the current directory and start watching
    pub async fn spawn(
        dir: PathBuf,
        store: TopologyStore,
        event_tx: mpsc::Sender<ChangeEvent>,
        config: &WatcherConfig,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let mut actor = ChangeWatcherActor::new(dir, store, event_tx, cmd_rx, config);
        actor.seed().await?;

        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Rescan immediately, returning the number of events emitted
    pub async fn scan_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WatcherCommand::ScanNow { respond_to: tx })
            .await
            .context("failed to send ScanNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Stop watching
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn quiet_config() -> WatcherConfig {
        WatcherConfig {
            poll_interval_ms: 3_600_000,
            settle_ms: 10,
        }
    }

    fn document(id: &str, name: &str) -> String {
        format!(r#"{{"id": "{id}", "name": "{name}", "imageRef": "map.png", "nodes": {{}}}}"#)
    }

    fn drain(rx: &mut mpsc::Receiver<ChangeEvent>) -> Vec<(ChangeKind, String)> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((event.kind, event.document_id));
        }
        events
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
    }

    #[tokio::test]
    async fn test_seed_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), document("a", "A")).unwrap();
        let store = TopologyStore::open(dir.path()).await.unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(16);

        let handle = WatcherHandle::spawn(dir.path().to_path_buf(), store, event_tx, &quiet_config())
            .await
            .unwrap();
        handle.scan_now().await.unwrap();

        assert!(drain(&mut event_rx).is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_document_id_change_emits_unlink_then_add() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        std::fs::write(&path, document("old", "Site")).unwrap();
        let store = TopologyStore::open(dir.path()).await.unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let handle =
            WatcherHandle::spawn(dir.path().to_path_buf(), store.clone(), event_tx, &quiet_config())
                .await
                .unwrap();

        std::fs::write(&path, document("new", "Site")).unwrap();
        handle.scan_now().await.unwrap();

        assert_eq!(
            drain(&mut event_rx),
            vec![
                (ChangeKind::Unlink, "old".to_string()),
                (ChangeKind::Add, "new".to_string())
            ]
        );
        assert!(store.get("old").await.is_err());
        assert!(store.get("new").await.is_ok());

        handle.shutdown().await.unwrap();
    }
}
