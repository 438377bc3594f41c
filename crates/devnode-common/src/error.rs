//! Error types shared by the record store, device provider and key codec.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for device provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A textual key that does not decode to a [`NodeKey`](crate::NodeKey).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key is not of the form `namespace/name` or `name`.
    #[error("invalid resource key: {key}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },
}

impl KeyError {
    /// Creates an invalid key error.
    pub fn invalid(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }
}

/// Errors returned by a [`RecordStore`](crate::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("Record not found: {key}")]
    NotFound {
        /// The record key.
        key: String,
    },

    /// A record with the same key already exists.
    #[error("Record already exists: {key}")]
    AlreadyExists {
        /// The record key.
        key: String,
    },

    /// The submitted version token is stale.
    #[error("Conflict on {key}: submitted version {submitted:?}, stored version {stored}")]
    Conflict {
        /// The record key.
        key: String,
        /// Version carried by the submitted record.
        submitted: Option<String>,
        /// Version currently stored.
        stored: String,
    },

    /// The backend failed (connection, command, transport).
    #[error("Store backend error: {operation}: {message}")]
    Backend {
        /// The operation that failed (e.g., "get", "update", "watch").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Creates a backend error.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true if the record was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors returned by a [`DeviceProvider`](crate::DeviceProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Reading device information failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Device information could not be parsed.
    #[error("Failed to parse {field} for device {device}: {message}")]
    Parse {
        /// The device being read.
        device: String,
        /// The attribute that failed to parse.
        field: String,
        /// Error message.
        message: String,
    },

    /// The provider cannot enumerate devices right now.
    #[error("Device inventory unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Creates an IO error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse(
        device: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            device: device.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_display() {
        assert_eq!(KeyError::invalid("a/b/c").to_string(), "invalid resource key: a/b/c");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Conflict {
            key: "openebs/node-1".to_string(),
            submitted: Some("3".to_string()),
            stored: "4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Conflict on openebs/node-1: submitted version Some(\"3\"), stored version 4"
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::parse("sda", "size", "not a number");
        assert_eq!(
            err.to_string(),
            "Failed to parse size for device sda: not a number"
        );
    }
}
