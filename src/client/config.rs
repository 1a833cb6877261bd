//! Configuration for the headless viewer

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::mirror::default_mirror_path;
use super::view::ImageSize;

/// Viewer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hub URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API authentication token (optional)
    pub api_token: Option<String>,

    /// Health poll interval in seconds (default: 30)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Local mirror save interval in seconds (default: 30)
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval: u64,

    /// Local mirror file (default: `<cache dir>/topomap/index.json`)
    pub mirror_path: Option<PathBuf>,

    /// Natural size of the map image, for pixel geometry
    #[serde(default = "default_image_width")]
    pub image_width: f64,

    #[serde(default = "default_image_height")]
    pub image_height: f64,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_autosave_interval() -> u64 {
    30
}

fn default_image_width() -> f64 {
    1000.0
}

fn default_image_height() -> f64 {
    1000.0
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let home = dirs::home_dir()?;
            let default_path = home.join(".config/topomap/viewer.toml");
            default_path.exists().then_some(default_path)
        });

        if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Self = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config
                .image_size()
                .validate()
                .with_context(|| format!("Invalid image size in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval.max(1))
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.mirror_path.clone().unwrap_or_else(default_mirror_path)
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(self.image_width, self.image_height)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: None,
            poll_interval: default_poll_interval(),
            autosave_interval: default_autosave_interval(),
            mirror_path: None,
            image_width: default_image_width(),
            image_height: default_image_height(),
        }
    }
}
