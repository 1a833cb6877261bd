//! Health status cache
//!
//! Keeps the latest [`HealthRecord`] per address and refreshes it lazily:
//!
//! - A fresh entry (younger than the TTL) is served without probing
//! - A stale or missing entry triggers exactly one refresh, no matter how many
//!   callers ask for that address while it is running
//! - The refresh runs in its own task; callers that give up waiting do not cancel it
//!
//! Entries are never evicted, only superseded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::probe::{HealthRecord, Prober};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// A captured health record
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub address: String,
    pub record: HealthRecord,
    pub captured_at: Instant,
}

type PendingProbe = Shared<BoxFuture<'static, HealthRecord>>;

enum Slot {
    Ready(CacheEntry),
    Refreshing(PendingProbe),
}

struct Inner {
    prober: Arc<dyn Prober>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to the shared cache
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Inner>,
}

impl StatusCache {
    pub fn new(prober: Arc<dyn Prober>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                prober,
                ttl,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the health of `address`, probing only when the cached record is stale
    pub async fn get(&self, address: &str) -> HealthRecord {
        let pending = {
            let mut slots = self.inner.slots();
            match slots.get(address) {
                Some(Slot::Ready(entry)) if entry.captured_at.elapsed() < self.inner.ttl => {
                    trace!("cache hit for {address}");
                    return entry.record.clone();
                }
                Some(Slot::Refreshing(pending)) => {
                    trace!("joining outstanding probe of {address}");
                    pending.clone()
                }
                _ => {
                    debug!("refreshing {address}");
                    let pending = self.refresh(address);
                    slots.insert(address.to_string(), Slot::Refreshing(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Number of addresses with a captured record
    pub fn len(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn refresh(&self, address: &str) -> PendingProbe {
        let inner = Arc::clone(&self.inner);
        let key = address.to_string();

        let task = tokio::spawn(async move {
            let record = inner.prober.probe(&key).await;
            let entry = CacheEntry {
                address: key.clone(),
                record: record.clone(),
                captured_at: Instant::now(),
            };
            inner.slots().insert(key, Slot::Ready(entry));
            record
        });

        let inner = Arc::clone(&self.inner);
        let key = address.to_string();

        async move {
            match task.await {
                Ok(record) => record,
                Err(e) => {
                    error!("probe task for {key} failed: {e}");
                    let mut slots = inner.slots();
                    if matches!(slots.get(&key), Some(Slot::Refreshing(_))) {
                        slots.remove(&key);
                    }
                    HealthRecord::failed(Utc::now())
                }
            }
        }
        .boxed()
        .shared()
    }
}
