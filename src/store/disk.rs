//! On-disk document layout
//!
//! One JSON file per property in a flat data directory. Writes go to a hidden
//! temporary file next to the target and are renamed into place, so a reader never
//! observes a half-written document under its final name.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, trace};

use super::error::{StorageError, TopologyResult, ValidationError};
use crate::topology::Property;

const EXTENSION: &str = "json";

/// Whether `path` names a document file (`*.json`, not hidden, not a temp file)
pub fn is_document_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && path.extension().is_some_and(|ext| ext == EXTENSION)
}

#[derive(Debug, Clone)]
pub struct DocumentStorage {
    dir: PathBuf,
}

impl DocumentStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Default location of the document with id `id`
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Reduce a client-supplied filename to a document path inside the data directory
    ///
    /// Only the final path component is kept; it must be a visible `*.json` name.
    pub fn resolve_filename(&self, filename: &str) -> Result<PathBuf, ValidationError> {
        let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
        let candidate = self.dir.join(base);

        if base.len() <= EXTENSION.len() + 1 || !is_document_path(&candidate) {
            return Err(ValidationError::InvalidFilename(filename.to_string()));
        }
        Ok(candidate)
    }

    /// Atomically replace the contents of `path`
    pub async fn write(&self, path: &Path, contents: &str) -> Result<(), StorageError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidDocument(format!("bad path {}", path.display())))?;
        let tmp = path.with_file_name(format!(".{name}.tmp"));

        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        trace!("wrote {}", path.display());
        Ok(())
    }

    /// Remove a document file; a file that is already gone is not an error
    pub async fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} already removed", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read and validate one document; `None` if the file does not exist
    pub async fn read(&self, path: &Path) -> TopologyResult<Option<Property>> {
        match fs::read_to_string(path).await {
            Ok(text) => Property::from_json(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and validate every document in the directory, ordered by path
    pub async fn load_all(&self) -> Result<Vec<(PathBuf, TopologyResult<Property>)>, StorageError> {
        let mut paths = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if is_document_path(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = match fs::read_to_string(&path).await {
                Ok(text) => Property::from_json(&text),
                Err(e) => Err(e.into()),
            };
            documents.push((path, parsed));
        }
        Ok(documents)
    }
}
