//! `ping`-backed prober
//!
//! Runs the OS `ping` binary directly (no shell) with a fixed echo count, under a
//! timeout and a bounded worker pool.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::{HealthRecord, OutputDialect, ProbeError, Prober};

pub const DEFAULT_COUNT: u32 = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_WORKERS: usize = 8;

/// Whether `address` is safe to hand to `ping` as a target argument
///
/// Accepts IP literals and hostnames made of letters, digits, `.`, `-` and `_`.
/// A leading `-` is rejected so the target can never be read as an option.
pub fn is_probe_target(address: &str) -> bool {
    if address.parse::<IpAddr>().is_ok() {
        return true;
    }

    !address.is_empty()
        && address.len() <= 253
        && !address.starts_with('-')
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub struct PingProber {
    count: u32,
    timeout: Duration,
    dialect: OutputDialect,
    workers: Arc<Semaphore>,
}

impl PingProber {
    pub fn new(count: u32, timeout: Duration, workers: usize) -> Self {
        Self {
            count: count.max(1),
            timeout,
            dialect: OutputDialect::native(),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    async fn run(&self, address: &str) -> Result<HealthRecord, ProbeError> {
        if !is_probe_target(address) {
            return Err(ProbeError::Unreachable(format!("invalid address {address:?}")));
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| ProbeError::ToolFailure(e.to_string()))?;

        let child = Command::new("ping")
            .arg(self.dialect.count_flag())
            .arg(self.count.to_string())
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::ToolFailure(format!("failed to spawn ping: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::ToolFailure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ProbeError::ToolFailure(e.to_string()))?;

        // 1 means some echoes went unanswered; the summary is still printed
        match output.status.code() {
            Some(0) | Some(1) => {}
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ProbeError::ToolFailure(format!(
                    "exit status {code:?}: {}",
                    stderr.trim()
                )));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = self.dialect.parse(&stdout, self.count);
        if summary.loss.is_none() && summary.latency.is_none() {
            debug!("{}", ProbeError::ParseFailure(address.to_string()));
        }

        Ok(HealthRecord::from_summary(summary, Utc::now()))
    }
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new(DEFAULT_COUNT, DEFAULT_TIMEOUT, DEFAULT_WORKERS)
    }
}

#[async_trait]
impl Prober for PingProber {
    #[instrument(skip(self))]
    async fn probe(&self, address: &str) -> HealthRecord {
        match self.run(address).await {
            Ok(record) => {
                debug!(status = %record.status, "probe finished");
                record
            }
            Err(e) => {
                warn!("probe of {address} failed: {e}");
                HealthRecord::failed(Utc::now())
            }
        }
    }
}
