//! Topology store
//!
//! Authoritative in-memory copy of every property, backed by one JSON document per
//! property on disk.
//!
//! ## Write-through
//!
//! Every mutation is applied to a copy of the document, validated, written to disk,
//! and only then committed in memory. A rejected or failed mutation leaves both the
//! in-memory and the on-disk state untouched.
//!
//! ## Usage
//!
//! ```no_run
//! use topomap::store::TopologyStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TopologyStore::open("./maps").await?;
//!     let property = store.create("Office", "office.png").await?;
//!     println!("created {}", property.id);
//!     Ok(())
//! }
//! ```

pub mod disk;
pub mod error;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::actors::messages::ChangeEvent;
use crate::protocol::ChangeKind;
use crate::topology::{NewNode, Node, NodeUpdate, Property};

pub use disk::DocumentStorage;
pub use error::{StorageError, TopologyError, TopologyResult, ValidationError};

struct Entry {
    property: Property,

    /// File mutations are written to
    path: PathBuf,

    /// Every file known to hold this document, `path` included
    paths: BTreeSet<PathBuf>,
}

#[derive(Default)]
struct Documents {
    entries: HashMap<String, Entry>,
}

impl Documents {
    fn insert(&mut self, property: Property, path: PathBuf) {
        match self.entries.get_mut(&property.id) {
            Some(entry) => {
                if entry.paths.insert(path.clone()) {
                    warn!(
                        "document {} is stored in both {} and {}",
                        property.id,
                        entry.path.display(),
                        path.display()
                    );
                }
                entry.property = property;
            }
            None => {
                let paths = BTreeSet::from([path.clone()]);
                self.entries
                    .insert(property.id.clone(), Entry { property, path, paths });
            }
        }
    }

    /// Forget that `path` holds document `id`
    ///
    /// Returns whether the document is gone: no file backs it any more, or it was
    /// never known.
    fn detach(&mut self, id: &str, path: &Path) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return true;
        };
        entry.paths.remove(path);
        if entry.path != path {
            return false;
        }

        match entry.paths.first().cloned() {
            Some(next) => {
                debug!("document {id} now backed by {}", next.display());
                entry.path = next;
                false
            }
            None => {
                self.entries.remove(id);
                true
            }
        }
    }
}

/// Shared handle to the topology documents
#[derive(Clone)]
pub struct TopologyStore {
    documents: Arc<Mutex<Documents>>,
    storage: Arc<DocumentStorage>,
}

impl TopologyStore {
    /// Open the data directory, creating it if needed, and load every valid document
    #[instrument]
    pub async fn open(dir: impl AsRef<Path> + std::fmt::Debug) -> TopologyResult<Self> {
        let storage = DocumentStorage::new(dir.as_ref());
        storage.ensure_dir().await?;

        let mut documents = Documents::default();
        for (path, loaded) in storage.load_all().await? {
            match loaded {
                Ok(property) => documents.insert(property, path),
                Err(e) => warn!("skipping {}: {e}", path.display()),
            }
        }
        info!(
            "loaded {} documents from {}",
            documents.entries.len(),
            storage.dir().display()
        );

        Ok(Self {
            documents: Arc::new(Mutex::new(documents)),
            storage: Arc::new(storage),
        })
    }

    pub fn data_dir(&self) -> &Path {
        self.storage.dir()
    }

    /// All properties, ordered by name then id
    pub async fn list(&self) -> Vec<Property> {
        let documents = self.documents.lock().await;
        let mut properties: Vec<_> = documents
            .entries
            .values()
            .map(|entry| entry.property.clone())
            .collect();
        properties.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        properties
    }

    pub async fn get(&self, id: &str) -> TopologyResult<Property> {
        self.documents
            .lock()
            .await
            .entries
            .get(id)
            .map(|entry| entry.property.clone())
            .ok_or_else(|| TopologyError::not_found("property", id))
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Create an empty property and write its document
    #[instrument(skip(self, image_ref))]
    pub async fn create(&self, name: &str, image_ref: &str) -> TopologyResult<Property> {
        let property = Property::new(name, image_ref)?;
        let path = self.storage.path_for(&property.id);

        let mut documents = self.documents.lock().await;
        self.storage
            .write(&path, &property.to_json_pretty()?)
            .await?;
        documents.insert(property.clone(), path);

        debug!("created property {}", property.id);
        Ok(property)
    }

    pub async fn add_node(&self, property_id: &str, new: NewNode) -> TopologyResult<Node> {
        self.mutate(property_id, |property| Ok(property.insert_node(new)?))
            .await
    }

    /// Point `node_id` at `parent_id`, or detach it with `None`
    pub async fn set_parent(
        &self,
        property_id: &str,
        node_id: &str,
        parent_id: Option<&str>,
    ) -> TopologyResult<Node> {
        self.mutate(property_id, |property| property.set_parent(node_id, parent_id))
            .await
    }

    pub async fn update_node(
        &self,
        property_id: &str,
        node_id: &str,
        update: NodeUpdate,
    ) -> TopologyResult<Node> {
        self.mutate(property_id, |property| property.update_node(node_id, update))
            .await
    }

    /// Remove a node, orphaning its children
    pub async fn delete_node(&self, property_id: &str, node_id: &str) -> TopologyResult<Node> {
        self.mutate(property_id, |property| property.remove_node(node_id))
            .await
    }

    /// Remove every node of a property, returning how many were dropped
    pub async fn clear_nodes(&self, property_id: &str) -> TopologyResult<usize> {
        self.mutate(property_id, |property| Ok(property.clear_nodes()))
            .await
    }

    /// Remove a property and every file holding it
    #[instrument(skip(self))]
    pub async fn delete_property(&self, id: &str) -> TopologyResult<()> {
        let mut documents = self.documents.lock().await;
        let paths = documents
            .entries
            .get(id)
            .map(|entry| entry.paths.clone())
            .ok_or_else(|| TopologyError::not_found("property", id))?;

        for path in &paths {
            self.storage.remove(path).await?;
        }
        documents.entries.remove(id);

        debug!("deleted property {id}");
        Ok(())
    }

    /// Save a raw document under a client-chosen filename
    ///
    /// The content must be a valid property; it is rewritten in canonical form. The
    /// named file becomes the document's only backing file: copies of the same
    /// document under other names are removed.
    #[instrument(skip(self, content))]
    pub async fn persist(&self, filename: &str, content: &str) -> TopologyResult<Property> {
        let path = self.storage.resolve_filename(filename)?;
        let property = Property::from_json(content)?;
        let text = property.to_json_pretty()?;

        let mut documents = self.documents.lock().await;
        self.storage.write(&path, &text).await?;

        // The file may have held a different document until now
        let displaced: Vec<String> = documents
            .entries
            .iter()
            .filter(|(id, entry)| **id != property.id && entry.paths.contains(&path))
            .map(|(id, _)| id.clone())
            .collect();
        for id in displaced {
            if documents.detach(&id, &path) {
                info!("document {id} was overwritten by {}", property.id);
            }
        }

        let mut paths = BTreeSet::from([path.clone()]);
        if let Some(previous) = documents.entries.get(&property.id) {
            for stale in previous.paths.iter().filter(|stale| **stale != path) {
                if let Err(e) = self.storage.remove(stale).await {
                    warn!("failed to remove old copy {}: {e}", stale.display());
                    paths.insert(stale.clone());
                }
            }
        }
        documents.entries.insert(
            property.id.clone(),
            Entry {
                property: property.clone(),
                path,
                paths,
            },
        );

        Ok(property)
    }

    /// Fold an externally detected change into memory
    ///
    /// The file is read again while the store is locked, so a write that landed
    /// after the watcher looked at the file is never overwritten by older content.
    /// Returns the event to broadcast, carrying the content just read, or `None`
    /// when the file no longer matches the event.
    pub async fn absorb(&self, event: ChangeEvent) -> Option<ChangeEvent> {
        let mut documents = self.documents.lock().await;

        let current = match self.storage.read(&event.path).await {
            Ok(current) => current,
            Err(e) => {
                debug!(
                    "ignoring {:?} of {}: {e}",
                    event.kind,
                    event.path.display()
                );
                return None;
            }
        };
        let holds_document = current
            .as_ref()
            .is_some_and(|property| property.id == event.document_id);

        match event.kind {
            ChangeKind::Add | ChangeKind::Change => {
                let Some(property) = current.filter(|_| holds_document) else {
                    debug!(
                        "{} no longer holds {}",
                        event.path.display(),
                        event.document_id
                    );
                    return None;
                };
                documents.insert(property.clone(), event.path.clone());
                Some(ChangeEvent {
                    content: Some(property),
                    ..event
                })
            }
            ChangeKind::Unlink if holds_document => {
                debug!("{} is back, ignoring unlink", event.path.display());
                None
            }
            ChangeKind::Unlink => documents
                .detach(&event.document_id, &event.path)
                .then_some(event),
        }
    }

    /// Apply `change` to a copy of the document and commit it once it is on disk
    async fn mutate<T, F>(&self, property_id: &str, change: F) -> TopologyResult<T>
    where
        F: FnOnce(&mut Property) -> TopologyResult<T>,
    {
        let mut documents = self.documents.lock().await;
        let entry = documents
            .entries
            .get_mut(property_id)
            .ok_or_else(|| TopologyError::not_found("property", property_id))?;

        let mut draft = entry.property.clone();
        let output = change(&mut draft)?;
        draft.validate()?;

        self.storage
            .write(&entry.path, &draft.to_json_pretty()?)
            .await?;
        entry.property = draft;

        Ok(output)
    }
}
