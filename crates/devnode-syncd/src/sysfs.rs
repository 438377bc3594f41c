//! Block device enumeration from sysfs.
//!
//! Every entry under `<root>/block` is a whole disk. Virtual devices are
//! skipped by name prefix, as are devices reporting zero capacity (empty
//! card readers and optical drives).

use async_trait::async_trait;
use devnode_common::{Device, DeviceProvider, ProviderError, ProviderResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default sysfs mount point
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Default device node directory
pub const DEFAULT_DEV_DIR: &str = "/dev";

/// Name prefixes of virtual block devices skipped by default
pub const DEFAULT_EXCLUDE_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr"];

/// sysfs reports `size` in 512-byte sectors regardless of the device's
/// logical block size.
const SECTOR_SIZE: u64 = 512;

/// [`DeviceProvider`] reading block devices from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsProvider {
    root: PathBuf,
    dev_dir: PathBuf,
    exclude_prefixes: Vec<String>,
}

impl SysfsProvider {
    /// Creates a provider over `root` (normally `/sys`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dev_dir: PathBuf::from(DEFAULT_DEV_DIR),
            exclude_prefixes: DEFAULT_EXCLUDE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Sets the directory device paths are reported under.
    pub fn with_dev_dir(mut self, dev_dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dev_dir.into();
        self
    }

    /// Replaces the excluded name prefixes.
    pub fn with_exclude_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.exclude_prefixes = prefixes;
        self
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    async fn read_device(&self, dir: &Path, name: &str) -> ProviderResult<Option<Device>> {
        // The device can disappear between enumeration and this read.
        let Some(size) = read_attr(&dir.join("size")).await? else {
            debug!(device = name, "Skipping device without size attribute");
            return Ok(None);
        };
        let sectors: u64 = size
            .parse()
            .map_err(|e: std::num::ParseIntError| ProviderError::parse(name, "size", e.to_string()))?;
        if sectors == 0 {
            debug!(device = name, "Skipping device with no media");
            return Ok(None);
        }

        let mut device = Device::new(
            name,
            self.dev_dir.join(name).display().to_string(),
            sectors.saturating_mul(SECTOR_SIZE),
        );
        if let Some(model) = read_attr(&dir.join("device/model")).await? {
            device = device.with_model(model);
        }
        if let Some(serial) = read_attr(&dir.join("device/serial")).await? {
            device = device.with_serial(serial);
        }
        if let Some(rotational) = read_attr(&dir.join("queue/rotational")).await? {
            device = device.with_rotational(rotational == "1");
        }
        Ok(Some(device))
    }
}

impl Default for SysfsProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

#[async_trait]
impl DeviceProvider for SysfsProvider {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> ProviderResult<Vec<Device>> {
        let block_dir = self.root.join("block");
        let mut entries = tokio::fs::read_dir(&block_dir)
            .await
            .map_err(|e| ProviderError::io(&block_dir, e))?;

        let mut devices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::io(&block_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_excluded(&name) {
                continue;
            }
            if let Some(device) = self.read_device(&entry.path(), &name).await? {
                devices.push(device);
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = devices.len(), "Enumerated block devices");
        Ok(devices)
    }
}

/// Reads a trimmed sysfs attribute. Missing or blank attributes are `None`.
async fn read_attr(path: &Path) -> ProviderResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(value) => {
            let value = value.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProviderError::io(path, e)),
    }
}
