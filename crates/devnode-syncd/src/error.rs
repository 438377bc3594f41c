//! Error types for devnodesyncd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include the record key and operation

use devnode_common::{ProviderError, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single reconciliation pass.
///
/// Every variant is retryable: the worker requeues the key with backoff and
/// the periodic resync bounds how long a failure can persist.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Device enumeration failed; nothing was written.
    /// NIST: CM-8 (System Component Inventory) - Inventory source errors
    #[error("Device enumeration failed: {0}")]
    Provider(#[from] ProviderError),

    /// A store read, create or update failed (including version conflicts).
    /// NIST: SI-7 (Integrity) - Optimistic concurrency rejected a stale write
    #[error("{operation} device node {key}: {source}")]
    Store {
        /// The store operation ("create", "update").
        operation: &'static str,
        /// The record key.
        key: String,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// The new record could not be built.
    #[error("Failed to build device node {key}: {message}")]
    Build {
        /// The record key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl ReconcileError {
    /// Creates a store error for `operation` on `key`.
    pub fn store(operation: &'static str, key: impl ToString, source: StoreError) -> Self {
        Self::Store {
            operation,
            key: key.to_string(),
            source,
        }
    }

    /// Returns true if the failure was an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store { source, .. } if source.is_conflict())
    }
}

/// Errors that stop the controller or the daemon.
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The record cache did not sync before the deadline (or shutdown was
    /// requested while waiting).
    /// NIST: CP-10 (System Recovery) - Startup precondition not met
    #[error("Timed out waiting for record cache to sync after {0:?}")]
    CacheSyncTimeout(Duration),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for devnodesyncd operations
pub type Result<T> = std::result::Result<T, ControllerError>;
