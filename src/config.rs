use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::util;

/// Probe worker settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    /// Echo requests per probe
    #[serde(default = "default_probe_count")]
    pub count: u32,

    /// Upper bound for one `ping` run
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent probes
    #[serde(default = "default_probe_workers")]
    pub workers: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            count: default_probe_count(),
            timeout_secs: default_probe_timeout(),
            workers: default_probe_workers(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_probe_count() -> u32 {
    4
}

fn default_probe_timeout() -> u64 {
    15
}

fn default_probe_workers() -> usize {
    8
}

/// Change detection settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WatcherConfig {
    /// Periodic rescan, independent of OS notifications
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Quiet period after a notification before rescanning
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            settle_ms: default_settle(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_settle() -> u64 {
    75
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Directory holding one JSON document per property
    #[serde(default = "util::get_default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "util::get_default_bind_addr")]
    pub bind_addr: String,

    /// Bearer token required on API requests when set
    pub auth_token: Option<String>,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Freshness window of cached health records
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: util::get_default_data_dir(),
            bind_addr: util::get_default_bind_addr(),
            auth_token: None,
            probe: ProbeConfig::default(),
            cache_ttl_secs: default_cache_ttl(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Let environment variables take precedence over file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = util::get_data_dir() {
            self.data_dir = dir;
        }
        if let Some(addr) = util::get_bind_addr() {
            self.bind_addr = addr;
        }
        if let Some(token) = util::get_token() {
            self.auth_token = Some(token);
        }
        self
    }
}

fn default_cache_ttl() -> u64 {
    30
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(text: &str) -> anyhow::Result<Config> {
    serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
