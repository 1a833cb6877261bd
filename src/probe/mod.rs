//! Reachability probing
//!
//! Turns one probe of a network address into a [`HealthRecord`].
//!
//! ## Classification
//!
//! In priority order:
//!
//! 1. loss or latency could not be parsed -> `unknown`
//! 2. loss >= 20% -> `critical`
//! 3. latency > 100 ms -> `warning`
//! 4. otherwise -> `good`
//!
//! Probe failures (bad address, tool missing, timeout, abnormal exit) are logged
//! and degrade to an `error` record with 100% loss. They never reach the caller as
//! an `Err`.

pub mod parser;
pub mod ping;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use parser::{OutputDialect, PingSummary};
pub use ping::PingProber;

/// Loss at or above this percentage is critical
pub const LOSS_CRITICAL_PERCENT: f64 = 20.0;

/// Average latency above this many milliseconds is a warning
pub const LATENCY_WARNING_MS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Good,
    Warning,
    Critical,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Good => "good",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent reachability assessment of one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub status: HealthStatus,

    /// Average round trip in milliseconds
    pub latency: Option<f64>,

    /// Packet loss in percent (0-100)
    pub loss: Option<f64>,

    pub last_check: Option<DateTime<Utc>>,
}

impl HealthRecord {
    /// Record for an address that has never been probed
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            latency: None,
            loss: None,
            last_check: None,
        }
    }

    /// Record for a probe that could not be carried out
    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Error,
            latency: None,
            loss: Some(100.0),
            last_check: Some(at),
        }
    }

    pub fn from_summary(summary: PingSummary, at: DateTime<Utc>) -> Self {
        Self {
            status: classify(summary.loss, summary.latency),
            latency: summary.latency,
            loss: summary.loss,
            last_check: Some(at),
        }
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Map parsed loss and latency to a status
pub fn classify(loss: Option<f64>, latency: Option<f64>) -> HealthStatus {
    let (Some(loss), Some(latency)) = (loss, latency) else {
        return HealthStatus::Unknown;
    };

    if loss >= LOSS_CRITICAL_PERCENT {
        HealthStatus::Critical
    } else if latency > LATENCY_WARNING_MS {
        HealthStatus::Warning
    } else {
        HealthStatus::Good
    }
}

/// Why a probe produced no usable measurement
#[derive(Debug)]
pub enum ProbeError {
    /// The address was rejected or the host did not answer at all
    Unreachable(String),

    /// The tool ran but its output had no recognizable summary
    ParseFailure(String),

    /// The tool could not be spawned, timed out, or exited abnormally
    ToolFailure(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Unreachable(msg) => write!(f, "unreachable: {msg}"),
            ProbeError::ParseFailure(msg) => write!(f, "unparsable ping output: {msg}"),
            ProbeError::ToolFailure(msg) => write!(f, "ping failed: {msg}"),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Something that can assess the reachability of an address
///
/// Implementations never fail: problems are folded into the returned record.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str) -> HealthRecord;
}
