//! Configuration file support for devnodesyncd
//!
//! Loads and validates daemon configuration from TOML files.
//! Default location: /etc/devnode/devnodesyncd.toml
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated, defaulted settings
//! - CM-2: Baseline Configuration - Every field has a documented default

use devnode_common::{BackoffConfig, NodeKey, OwnerReference};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ControllerConfig, DEFAULT_NAMESPACE};
use crate::error::{ControllerError, Result};
use crate::sysfs::{DEFAULT_DEV_DIR, DEFAULT_EXCLUDE_PREFIXES, DEFAULT_SYSFS_ROOT};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/devnode/devnodesyncd.toml";

/// Identity of the local node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Namespace holding DeviceNode records
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Node identifier; the record name
    #[serde(default)]
    pub node_id: String,
}

/// Owner stamped on the record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerConfig {
    /// API version of the owner
    #[serde(default = "default_owner_api_version")]
    pub api_version: String,

    /// Kind of the owner
    #[serde(default = "default_owner_kind")]
    pub kind: String,

    /// Owner name; empty means the node id
    #[serde(default)]
    pub name: String,

    /// Owner UID
    #[serde(default)]
    pub uid: String,
}

/// Controller timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Resync interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Number of worker loops
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Cache sync deadline in seconds
    #[serde(default = "default_cache_sync_timeout")]
    pub cache_sync_timeout_secs: u64,

    /// Relist delay after a broken watch in milliseconds
    #[serde(default = "default_relist_delay")]
    pub relist_delay_ms: u64,

    /// Initial requeue backoff in milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Requeue backoff cap in seconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

/// Record store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; records do not outlive the daemon
    Memory,
    /// Redis-backed store
    Redis,
}

/// Record store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number
    #[serde(default)]
    pub redis_db: u8,
}

/// Device source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Enumerate block devices from sysfs
    Sysfs,
    /// Report no devices
    Static,
}

/// Device provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider selection
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// sysfs mount point
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Directory device paths are reported under
    #[serde(default = "default_dev_dir")]
    pub dev_dir: PathBuf,

    /// Name prefixes of devices to skip
    #[serde(default = "default_exclude_prefixes")]
    pub exclude_prefixes: Vec<String>,
}

/// Complete devnodesyncd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,

    /// Record owner
    #[serde(default)]
    pub owner: OwnerConfig,

    /// Controller timing
    #[serde(default)]
    pub controller: ControllerSection,

    /// Record store
    #[serde(default)]
    pub store: StoreConfig,

    /// Device provider
    #[serde(default)]
    pub provider: ProviderConfig,
}

// Default functions
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_owner_api_version() -> String {
    "v1".to_string()
}

fn default_owner_kind() -> String {
    "Node".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_workers() -> usize {
    1
}

fn default_cache_sync_timeout() -> u64 {
    120
}

fn default_relist_delay() -> u64 {
    1000
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    1000
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::Sysfs
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DEV_DIR)
}

fn default_exclude_prefixes() -> Vec<String> {
    DEFAULT_EXCLUDE_PREFIXES.iter().map(|p| p.to_string()).collect()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            node_id: String::new(),
        }
    }
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            api_version: default_owner_api_version(),
            kind: default_owner_kind(),
            name: String::new(),
            uid: String::new(),
        }
    }
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            workers: default_workers(),
            cache_sync_timeout_secs: default_cache_sync_timeout(),
            relist_delay_ms: default_relist_delay(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_db: 0,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            sysfs_root: default_sysfs_root(),
            dev_dir: default_dev_dir(),
            exclude_prefixes: default_exclude_prefixes(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ControllerError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    "devnodesyncd: Config file not found, using defaults"
                );
                Ok(Self::default())
            }
            Err(e) => Err(ControllerError::Io(e)),
        }
    }

    /// Resync interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.controller.poll_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.node_id.is_empty() {
            return Err(ControllerError::Config(
                "node_id must be set (config file, --node-id or NODE_NAME)".to_string(),
            ));
        }

        if self.owner.uid.is_empty() {
            return Err(ControllerError::Config("owner uid must be set".to_string()));
        }

        if self.controller.workers == 0 {
            return Err(ControllerError::Config("workers must be > 0".to_string()));
        }

        if self.controller.poll_interval_secs == 0 {
            return Err(ControllerError::Config(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.controller.backoff_base_ms == 0 {
            return Err(ControllerError::Config(
                "backoff_base_ms must be > 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_port == 0 {
            return Err(ControllerError::Config("redis_port must be > 0".to_string()));
        }

        Ok(())
    }

    /// Builds the controller configuration.
    pub fn to_controller_config(&self) -> Result<ControllerConfig> {
        self.validate()?;

        let identity = NodeKey::new(&self.node.namespace, &self.node.node_id);
        let owner_name = if self.owner.name.is_empty() {
            &self.node.node_id
        } else {
            &self.owner.name
        };
        let owner = OwnerReference::controller_ref(
            &self.owner.api_version,
            &self.owner.kind,
            owner_name,
            &self.owner.uid,
        );

        let config = ControllerConfig::new(identity, owner)
            .with_poll_interval(self.poll_interval())
            .with_workers(self.controller.workers)
            .with_cache_sync_timeout(Duration::from_secs(self.controller.cache_sync_timeout_secs))
            .with_relist_delay(Duration::from_millis(self.controller.relist_delay_ms))
            .with_backoff(BackoffConfig::new(
                Duration::from_millis(self.controller.backoff_base_ms),
                Duration::from_secs(self.controller.backoff_max_secs),
            ));
        config.validate()?;
        Ok(config)
    }
}
