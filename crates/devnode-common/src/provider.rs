//! Device inventory provider abstraction.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ProviderError, ProviderResult};
use crate::types::Device;

/// Source of the devices currently attached to the local node.
///
/// Each call is a point-in-time enumeration; the returned list is used
/// verbatim for one reconciliation pass.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Lists the devices present on the node.
    async fn list(&self) -> ProviderResult<Vec<Device>>;
}

/// Provider returning a configurable device list.
///
/// Used when the device set is fixed (or managed by another component) and
/// in tests, where the list or a failure can be swapped between passes.
#[derive(Debug, Default)]
pub struct StaticProvider {
    devices: Mutex<Vec<Device>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticProvider {
    /// Creates a provider returning `devices`.
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    /// Replaces the device list returned by later calls.
    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock() = devices;
    }

    /// Makes later calls fail with `message` until cleared.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Clears a failure set by [`fail_with`](Self::fail_with).
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Returns how many times [`DeviceProvider::list`] was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProvider for StaticProvider {
    async fn list(&self) -> ProviderResult<Vec<Device>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().clone() {
            return Err(ProviderError::Unavailable(message));
        }
        Ok(self.devices.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticProvider::new(vec![Device::new("sda", "/dev/sda", 1)]);
        assert_eq!(provider.list().await.unwrap().len(), 1);

        provider.set_devices(vec![]);
        assert!(provider.list().await.unwrap().is_empty());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_static_provider_failure() {
        let provider = StaticProvider::new(vec![]);
        provider.fail_with("udev not ready");
        assert!(matches!(
            provider.list().await,
            Err(ProviderError::Unavailable(_))
        ));

        provider.clear_failure();
        assert!(provider.list().await.is_ok());
    }
}
