//! Reconciler - converges the local DeviceNode record
//!
//! A pass reads the cached record, enumerates the devices on the node and
//! writes only when the record is absent, its owner references drifted, or
//! its device list differs. Device lists are compared as multisets; order
//! never triggers a write.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Publish the node's storage devices
//! - SI-7: Software, Firmware, and Information Integrity - Optimistic concurrency
//! - AU-12: Audit Record Generation - Log every write and its reason

use devnode_common::{
    devices_equal, Device, DeviceNodeBuilder, DeviceProvider, NodeKey, OwnerReference, RecordStore,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::cache::RecordCache;
use crate::error::ReconcileError;
use crate::owner_ref::repair_owner_references;

/// Result of a successful reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOutcome {
    /// The record was absent and has been created
    Created,
    /// The record drifted and has been updated
    Updated,
    /// The record already matched; nothing was written
    Unchanged,
    /// The key could not be parsed; dropped without retry
    InvalidKey,
}

impl SyncOutcome {
    /// Returns true if the pass wrote to the store.
    pub fn wrote(&self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

/// Reconciles DeviceNode records against the devices present on the node.
pub struct Reconciler {
    cache: Arc<RecordCache>,
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn DeviceProvider>,
    owner: OwnerReference,
}

impl Reconciler {
    /// Creates a reconciler that stamps `owner` on every record it writes.
    pub fn new(
        cache: Arc<RecordCache>,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn DeviceProvider>,
        owner: OwnerReference,
    ) -> Self {
        Self {
            cache,
            store,
            provider,
            owner,
        }
    }

    /// Reconciles the record named by a queue key.
    ///
    /// A key that does not parse is logged and reported as
    /// [`SyncOutcome::InvalidKey`]; retrying it could never succeed.
    pub async fn sync_handler(&self, key: &str) -> Result<SyncOutcome, ReconcileError> {
        match NodeKey::parse(key) {
            Ok(key) => self.sync_node(&key).await,
            Err(e) => {
                error!(key, error = %e, "Invalid resource key");
                Ok(SyncOutcome::InvalidKey)
            }
        }
    }

    /// Reconciles the record for `key`.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn sync_node(&self, key: &NodeKey) -> Result<SyncOutcome, ReconcileError> {
        let cached = self.cache.get(key);

        let devices = self.provider.list().await?;
        debug!(?devices, "Devices present on node");

        let Some(cached) = cached else {
            return self.create_node(key, devices).await;
        };

        // The cached record is shared; work on a private copy.
        let mut node = (*cached).clone();
        let mut update_required = false;

        if repair_owner_references(&mut node.metadata.owner_references, &self.owner) {
            info!(
                current = ?cached.metadata.owner_references,
                required = ?self.owner,
                "Device node owner references updated"
            );
            update_required = true;
        }

        if !devices_equal(&node.devices, &devices) {
            info!(
                current = node.devices.len(),
                observed = devices.len(),
                "Device node devices changed"
            );
            node.devices = devices;
            update_required = true;
        }

        if !update_required {
            debug!("Device node up to date");
            return Ok(SyncOutcome::Unchanged);
        }

        let updated = self
            .store
            .update(&node)
            .await
            .map_err(|e| ReconcileError::store("update", key, e))?;
        info!(version = ?updated.metadata.resource_version, "Updated device node");
        Ok(SyncOutcome::Updated)
    }

    async fn create_node(&self, key: &NodeKey, devices: Vec<Device>) -> Result<SyncOutcome, ReconcileError> {
        let node = DeviceNodeBuilder::new()
            .with_key(key)
            .with_devices(devices)
            .with_owner_reference(self.owner.clone())
            .build()
            .map_err(|e| ReconcileError::Build {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let created = self
            .store
            .create(&node)
            .await
            .map_err(|e| ReconcileError::store("create", key, e))?;
        info!(
            devices = created.devices.len(),
            version = ?created.metadata.resource_version,
            "Created device node"
        );
        Ok(SyncOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnode_common::{DeviceNode, MemoryStore, StaticProvider, WatchEvent};
    use pretty_assertions::assert_eq;

    struct Fixture {
        cache: Arc<RecordCache>,
        store: Arc<MemoryStore>,
        provider: Arc<StaticProvider>,
        reconciler: Reconciler,
    }

    fn owner() -> OwnerReference {
        OwnerReference::controller_ref("v1", "Node", "node-1", "node-uid")
    }

    fn key() -> NodeKey {
        NodeKey::new("openebs", "node-1")
    }

    fn fixture(devices: Vec<Device>) -> Fixture {
        let cache = Arc::new(RecordCache::new());
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(StaticProvider::new(devices));
        let reconciler = Reconciler::new(cache.clone(), store.clone(), provider.clone(), owner());
        Fixture {
            cache,
            store,
            provider,
            reconciler,
        }
    }

    /// Stores `node` and mirrors it into the cache the way the informer would.
    async fn seed(f: &Fixture, node: DeviceNode) -> DeviceNode {
        let stored = f.store.create(&node).await.unwrap();
        f.cache.apply(WatchEvent::Added(stored.clone()));
        stored
    }

    fn sda() -> Device {
        Device::new("sda", "/dev/sda", 1 << 30)
    }

    fn sdb() -> Device {
        Device::new("sdb", "/dev/sdb", 2 << 30)
    }

    #[tokio::test]
    async fn test_creates_missing_record() {
        let f = fixture(vec![sda(), sdb()]);

        let outcome = f.reconciler.sync_node(&key()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let stored = f.store.get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.devices, vec![sda(), sdb()]);
        assert_eq!(stored.metadata.owner_references, vec![owner()]);
    }

    #[tokio::test]
    async fn test_unchanged_record_is_not_written() {
        let f = fixture(vec![sdb(), sda()]);
        let node = DeviceNodeBuilder::new()
            .with_key(&key())
            .with_devices(vec![sda(), sdb()])
            .with_owner_reference(owner())
            .build()
            .unwrap();
        let stored = seed(&f, node).await;

        let outcome = f.reconciler.sync_node(&key()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert!(!outcome.wrote());

        let after = f.store.get(&key()).await.unwrap().unwrap();
        assert_eq!(after.metadata.resource_version, stored.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_device_change_updates_record() {
        let f = fixture(vec![sda(), Device::new("sdc", "/dev/sdc", 4 << 30)]);
        let node = DeviceNodeBuilder::new()
            .with_key(&key())
            .with_devices(vec![sda(), sdb()])
            .with_owner_reference(owner())
            .build()
            .unwrap();
        seed(&f, node).await;

        assert_eq!(f.reconciler.sync_node(&key()).await.unwrap(), SyncOutcome::Updated);

        let after = f.store.get(&key()).await.unwrap().unwrap();
        let names: Vec<_> = after.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sda", "sdc"]);
    }

    #[tokio::test]
    async fn test_owner_repair_keeps_devices() {
        let f = fixture(vec![sda()]);
        let node = DeviceNodeBuilder::new()
            .with_key(&key())
            .with_devices(vec![sda()])
            .build()
            .unwrap();
        seed(&f, node).await;

        assert_eq!(f.reconciler.sync_node(&key()).await.unwrap(), SyncOutcome::Updated);

        let after = f.store.get(&key()).await.unwrap().unwrap();
        assert_eq!(after.metadata.owner_references, vec![owner()]);
        assert_eq!(after.devices, vec![sda()]);
    }

    #[tokio::test]
    async fn test_cached_record_is_not_mutated() {
        let f = fixture(vec![sdb()]);
        let node = DeviceNodeBuilder::new()
            .with_key(&key())
            .with_devices(vec![sda()])
            .build()
            .unwrap();
        seed(&f, node).await;
        let before = f.cache.get(&key()).unwrap();

        f.reconciler.sync_node(&key()).await.unwrap();

        assert_eq!(before.devices, vec![sda()]);
        assert!(before.metadata.owner_references.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_writes_nothing() {
        let f = fixture(vec![sda()]);
        f.provider.fail_with("sysfs unavailable");

        let err = f.reconciler.sync_node(&key()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Provider(_)));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_stale_cache_yields_conflict() {
        let f = fixture(vec![sdb()]);
        let node = DeviceNodeBuilder::new()
            .with_key(&key())
            .with_devices(vec![sda()])
            .with_owner_reference(owner())
            .build()
            .unwrap();
        let stored = seed(&f, node).await;

        // A concurrent writer bumps the version behind the cache's back.
        f.store.update(&stored).await.unwrap();

        let err = f.reconciler.sync_node(&key()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_invalid_key_is_dropped() {
        let f = fixture(vec![sda()]);
        let outcome = f.reconciler.sync_handler("a/b/c").await.unwrap();
        assert_eq!(outcome, SyncOutcome::InvalidKey);
        assert_eq!(f.provider.calls(), 0);
    }
}
