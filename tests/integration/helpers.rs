//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use topomap::config::WatcherConfig;
use topomap::probe::{HealthRecord, HealthStatus, Prober};
use topomap::protocol::ChangeMessage;
use tokio::sync::mpsc;

/// Upper bound for anything that crosses the watcher
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Watcher settings that react quickly in tests
pub fn fast_watcher() -> WatcherConfig {
    WatcherConfig {
        poll_interval_ms: 100,
        settle_ms: 20,
    }
}

pub fn document(id: &str, name: &str) -> String {
    format!(r#"{{"id": "{id}", "name": "{name}", "imageRef": "map.png", "nodes": {{}}}}"#)
}

/// Wait for the next session message that satisfies `accept`
pub async fn next_message(
    rx: &mut mpsc::Receiver<String>,
    accept: impl Fn(&ChangeMessage) -> bool,
) -> ChangeMessage {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let text = rx.recv().await.expect("session closed");
            let message: ChangeMessage = serde_json::from_str(&text).unwrap();
            if accept(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for change message")
}

/// Prober that answers with a fixed record and counts calls
pub struct CountingProber {
    calls: AtomicUsize,
    record: HealthRecord,
}

impl CountingProber {
    pub fn good(latency: f64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            record: HealthRecord {
                status: HealthStatus::Good,
                latency: Some(latency),
                loss: Some(0.0),
                last_check: Some(chrono::Utc::now()),
            },
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for CountingProber {
    async fn probe(&self, _address: &str) -> HealthRecord {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record.clone()
    }
}
