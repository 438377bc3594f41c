//! Informer: keeps the [`RecordCache`] current and turns store changes into
//! notifications.
//!
//! The informer subscribes to the store's watch stream, lists the namespace,
//! replaces the cache with the list and then applies watch events until the
//! stream ends. A broken stream triggers a relist after a short delay; keys
//! that vanished in between are reported as tombstones.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous observation of record changes
//! - CP-10: System Recovery - Relist after a broken watch

use devnode_common::{DeviceNode, NodeKey, RecordStore, StoreResult};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;

/// A deleted record.
#[derive(Debug, Clone)]
pub enum DeletedRecord {
    /// The deletion was observed directly; this is the record's final state.
    Live(Arc<DeviceNode>),
    /// The deletion was inferred on relist; only the last cached state is known.
    Tombstone {
        /// Key of the vanished record
        key: NodeKey,
        /// Last state seen before the record vanished
        last_known: Arc<DeviceNode>,
    },
}

impl DeletedRecord {
    /// Returns the key of the deleted record.
    pub fn key(&self) -> NodeKey {
        match self {
            DeletedRecord::Live(node) => node.key(),
            DeletedRecord::Tombstone { key, .. } => key.clone(),
        }
    }
}

/// A change observed in the record store.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A record appeared
    Added(Arc<DeviceNode>),
    /// A record changed (or was re-observed on relist)
    Updated {
        /// Previously cached state
        old: Arc<DeviceNode>,
        /// New state
        new: Arc<DeviceNode>,
    },
    /// A record was deleted
    Deleted(DeletedRecord),
}

impl Notification {
    /// Returns the key of the record this notification is about.
    pub fn key(&self) -> NodeKey {
        match self {
            Notification::Added(node) => node.key(),
            Notification::Updated { new, .. } => new.key(),
            Notification::Deleted(deleted) => deleted.key(),
        }
    }
}

/// Receiver of informer notifications.
pub trait NotificationHandler: Send + Sync {
    /// Handles one notification. Must not block.
    fn on_notification(&self, notification: Notification);
}

/// Drives the record cache from a [`RecordStore`].
pub struct Informer {
    store: Arc<dyn RecordStore>,
    cache: Arc<RecordCache>,
    namespace: String,
    relist_delay: Duration,
}

impl Informer {
    /// Creates an informer for `namespace`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<RecordCache>,
        namespace: impl Into<String>,
        relist_delay: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            namespace: namespace.into(),
            relist_delay,
        }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(self, handler: Arc<dyn NotificationHandler>, shutdown: CancellationToken) {
        info!(namespace = %self.namespace, "Starting record informer");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.list_and_watch(handler.as_ref()) => outcome,
            };
            match outcome {
                Ok(()) => warn!(namespace = %self.namespace, "Record watch closed, relisting"),
                Err(e) => warn!(namespace = %self.namespace, error = %e, "Record list/watch failed, retrying"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.relist_delay) => {}
            }
        }

        info!(namespace = %self.namespace, "Record informer stopped");
    }

    /// One list-then-watch cycle. Returns when the watch stream ends.
    async fn list_and_watch(&self, handler: &dyn NotificationHandler) -> StoreResult<()> {
        // Subscribe before listing so no change between the two is missed.
        let mut events = self.store.watch(&self.namespace).await?;
        let list = self.store.list(&self.namespace).await?;
        debug!(namespace = %self.namespace, count = list.items.len(), "Listed records");

        for notification in self.cache.replace(list.items) {
            handler.on_notification(notification);
        }
        self.cache.mark_synced();

        while let Some(event) = events.next().await {
            if let Some(notification) = self.cache.apply(event) {
                handler.on_notification(notification);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnode_common::{DeviceNodeBuilder, MemoryStore};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Notification>>,
    }

    impl NotificationHandler for Recorder {
        fn on_notification(&self, notification: Notification) {
            self.seen.lock().push(notification);
        }
    }

    fn node(name: &str) -> DeviceNode {
        DeviceNodeBuilder::new()
            .with_namespace("openebs")
            .with_name(name)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_informer_lists_then_watches() {
        let store = Arc::new(MemoryStore::new());
        store.create(&node("node-1")).await.unwrap();

        let cache = Arc::new(RecordCache::new());
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let informer = Informer::new(store.clone(), cache.clone(), "openebs", Duration::from_millis(10));
        let task = tokio::spawn(informer.run(recorder.clone(), shutdown.clone()));

        cache.wait_synced().await;
        assert_eq!(cache.len(), 1);

        store.create(&node("node-2")).await.unwrap();
        store.delete(&NodeKey::new("openebs", "node-1")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.len() != 1 || cache.get(&NodeKey::new("openebs", "node-2")).is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        task.await.unwrap();

        let seen = recorder.seen.lock();
        assert!(matches!(seen[0], Notification::Added(_)));
        assert!(seen
            .iter()
            .any(|n| matches!(n, Notification::Deleted(DeletedRecord::Live(node)) if node.metadata.name == "node-1")));
    }

    #[test]
    fn test_notification_key() {
        let record = Arc::new(node("node-1"));
        let tombstone = Notification::Deleted(DeletedRecord::Tombstone {
            key: NodeKey::new("openebs", "node-1"),
            last_known: record.clone(),
        });
        assert_eq!(tombstone.key(), NodeKey::new("openebs", "node-1"));
        assert_eq!(Notification::Added(record).key().to_string(), "openebs/node-1");
    }
}
