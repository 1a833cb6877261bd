//! Error types for topology storage and validation
//!
//! Two families of errors come out of the topology layer:
//!
//! - [`StorageError`]: the durable side went wrong (missing document, I/O, unparsable file)
//! - [`ValidationError`]: the request itself was rejected before anything was mutated
//!
//! [`TopologyError`] is the union returned by [`crate::store::TopologyStore`].

use std::fmt;

/// Result type alias for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors that originate in durable storage
#[derive(Debug)]
pub enum StorageError {
    /// The referenced property or node does not exist
    NotFound { resource: &'static str, id: String },

    /// Reading or writing a document failed
    Io(std::io::Error),

    /// A document could not be parsed as a property
    InvalidDocument(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { resource, id } => write!(f, "{resource} not found: {id}"),
            StorageError::Io(err) => write!(f, "I/O error: {err}"),
            StorageError::InvalidDocument(msg) => write!(f, "invalid document: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidDocument(err.to_string())
    }
}

/// Errors raised when a request or a document violates the topology rules
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is absent or empty
    MissingField(&'static str),

    /// Assigning the parent would close a loop in the parent forest
    CycleDetected { node: String, parent: String },

    /// Two nodes would share the same id
    DuplicateId(String),

    /// A node is stored under a key that differs from its own id
    IdMismatch { key: String, id: String },

    /// A coordinate is NaN or infinite
    InvalidCoordinate { axis: &'static str, value: f64 },

    /// A background image dimension is not a positive finite number
    InvalidImageSize { axis: &'static str, value: f64 },

    /// A persist filename is not a plain `*.json` file name
    InvalidFilename(String),

    /// The operation needs a selected property and none is active
    NoActiveDocument,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "missing required field: {field}"),
            ValidationError::CycleDetected { node, parent } => {
                write!(f, "setting parent of {node} to {parent} would create a cycle")
            }
            ValidationError::DuplicateId(id) => write!(f, "duplicate node id: {id}"),
            ValidationError::IdMismatch { key, id } => {
                write!(f, "node stored under key {key} carries id {id}")
            }
            ValidationError::InvalidCoordinate { axis, value } => {
                write!(f, "coordinate {axis} must be finite, got {value}")
            }
            ValidationError::InvalidImageSize { axis, value } => {
                write!(f, "{axis} must be positive, got {value}")
            }
            ValidationError::InvalidFilename(name) => write!(f, "invalid document filename: {name}"),
            ValidationError::NoActiveDocument => write!(f, "no property is selected"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Union of storage and validation failures
#[derive(Debug)]
pub enum TopologyError {
    Storage(StorageError),
    Validation(ValidationError),
}

impl TopologyError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        TopologyError::Storage(StorageError::NotFound {
            resource,
            id: id.into(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TopologyError::Storage(StorageError::NotFound { .. }))
    }
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::Storage(err) => err.fmt(f),
            TopologyError::Validation(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for TopologyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TopologyError::Storage(err) => Some(err),
            TopologyError::Validation(err) => Some(err),
        }
    }
}

impl From<StorageError> for TopologyError {
    fn from(err: StorageError) -> Self {
        TopologyError::Storage(err)
    }
}

impl From<ValidationError> for TopologyError {
    fn from(err: ValidationError) -> Self {
        TopologyError::Validation(err)
    }
}

impl From<std::io::Error> for TopologyError {
    fn from(err: std::io::Error) -> Self {
        TopologyError::Storage(StorageError::Io(err))
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        TopologyError::Storage(StorageError::from(err))
    }
}
