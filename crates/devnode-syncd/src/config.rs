//! Controller configuration.
//!
//! Fixed at construction and passed explicitly to the controller and the
//! reconciler; nothing here is process-global.

use devnode_common::{BackoffConfig, NodeKey, OwnerReference};
use std::time::Duration;

use crate::error::{ControllerError, Result};

/// Default namespace of DeviceNode records
pub const DEFAULT_NAMESPACE: &str = "openebs";

/// Default resync interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of worker loops
pub const DEFAULT_WORKERS: usize = 1;

/// Default deadline for the initial cache sync
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay before relisting after a broken watch
pub const DEFAULT_RELIST_DELAY: Duration = Duration::from_secs(1);

/// Configuration of the DeviceNode controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Identity of the local node's record
    pub identity: NodeKey,
    /// Owner every record must reference
    pub owner: OwnerReference,
    /// Interval between forced reconciliations
    pub poll_interval: Duration,
    /// Number of worker loops
    pub workers: usize,
    /// Deadline for the initial cache sync
    pub cache_sync_timeout: Duration,
    /// Delay before relisting after a broken watch
    pub relist_delay: Duration,
    /// Requeue backoff bounds
    pub backoff: BackoffConfig,
}

impl ControllerConfig {
    /// Creates a config with default timings for the given identity and owner.
    pub fn new(identity: NodeKey, owner: OwnerReference) -> Self {
        Self {
            identity,
            owner,
            poll_interval: DEFAULT_POLL_INTERVAL,
            workers: DEFAULT_WORKERS,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            relist_delay: DEFAULT_RELIST_DELAY,
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the resync interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the number of worker loops.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the cache sync deadline.
    pub fn with_cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout = timeout;
        self
    }

    /// Sets the relist delay.
    pub fn with_relist_delay(mut self, delay: Duration) -> Self {
        self.relist_delay = delay;
        self
    }

    /// Sets the requeue backoff bounds.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Checks the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.identity.name.is_empty() {
            return Err(ControllerError::Config("node id cannot be empty".to_string()));
        }
        if self.identity.name.contains('/') || self.identity.namespace.contains('/') {
            return Err(ControllerError::Config(format!(
                "node identity {} must not contain '/'",
                self.identity
            )));
        }
        if self.owner.uid.is_empty() {
            return Err(ControllerError::Config("owner uid cannot be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(ControllerError::Config("workers must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ControllerError::Config("poll interval must be positive".to_string()));
        }
        if self.backoff.base_delay.is_zero() {
            return Err(ControllerError::Config(
                "backoff base delay must be positive".to_string(),
            ));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(ControllerError::Config(
                "backoff base delay exceeds max delay".to_string(),
            ));
        }
        Ok(())
    }
}
