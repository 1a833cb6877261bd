//! Local resilience copy of the property index
//!
//! Saved periodically and at shutdown; read only when the hub cannot be reached
//! at startup. The file holds an object keyed by property id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, warn};

use crate::topology::Property;

pub fn default_mirror_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("topomap")
        .join("index.json")
}

#[derive(Debug, Clone)]
pub struct LocalMirror {
    path: PathBuf,
}

impl LocalMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the mirror with `properties`
    pub async fn save(&self, properties: &[Property]) -> Result<()> {
        let index: BTreeMap<&str, &Property> = properties
            .iter()
            .map(|property| (property.id.as_str(), property))
            .collect();
        let text = serde_json::to_string_pretty(&index)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .context("mirror path has no file name")?;
        let tmp = self.path.with_file_name(format!(".{name}.tmp"));
        fs::write(&tmp, text).await?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        debug!("mirrored {} properties to {}", index.len(), self.path.display());
        Ok(())
    }

    /// Read the mirror; a missing file is an empty index
    pub async fn load(&self) -> Result<Vec<Property>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        let index: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).context("mirror is not a JSON object")?;

        let mut properties = Vec::with_capacity(index.len());
        for (id, value) in index {
            match serde_json::from_value::<Property>(value) {
                Ok(property) if property.validate().is_ok() && property.id == id => {
                    properties.push(property)
                }
                Ok(_) => warn!("skipping invalid mirrored property {id}"),
                Err(e) => warn!("skipping unreadable mirrored property {id}: {e}"),
            }
        }
        Ok(properties)
    }
}
