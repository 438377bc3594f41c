//! Trigger source: maps record notifications to work-queue keys.
//!
//! Only the local node's record is of interest. Notifications for any other
//! key are logged and dropped; additions, updates and deletions of the local
//! record all enqueue its key.

use devnode_common::{NodeKey, WorkQueue};
use tracing::{info, warn};

use crate::informer::{DeletedRecord, Notification, NotificationHandler};

/// Filters notifications down to the local node's key.
#[derive(Debug, Clone)]
pub struct TriggerSource {
    identity: NodeKey,
    queue: WorkQueue<String>,
}

impl TriggerSource {
    /// Creates a trigger source that feeds `queue` with `identity`'s key.
    pub fn new(identity: NodeKey, queue: WorkQueue<String>) -> Self {
        Self { identity, queue }
    }

    /// Enqueues `key` if it is the local node's key.
    ///
    /// Returns true if the key was enqueued.
    pub fn enqueue(&self, key: &NodeKey) -> bool {
        if *key != self.identity {
            warn!(%key, expected = %self.identity, "Skipping device node object");
            return false;
        }
        self.queue.add(key.to_string());
        true
    }

    /// Handles one notification, returning true if a key was enqueued.
    pub fn handle(&self, notification: &Notification) -> bool {
        match notification {
            Notification::Added(node) => {
                info!(key = %node.key(), "Got add event for device node")
            }
            Notification::Updated { new, .. } => {
                info!(key = %new.key(), "Got update event for device node")
            }
            Notification::Deleted(DeletedRecord::Live(node)) => {
                info!(key = %node.key(), "Got delete event for device node")
            }
            Notification::Deleted(DeletedRecord::Tombstone { key, .. }) => {
                info!(%key, "Got delete event for vanished device node")
            }
        }
        self.enqueue(&notification.key())
    }
}

impl NotificationHandler for TriggerSource {
    fn on_notification(&self, notification: Notification) {
        self.handle(&notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnode_common::{DeviceNode, DeviceNodeBuilder, WorkQueueConfig};
    use std::sync::Arc;

    fn node(name: &str) -> Arc<DeviceNode> {
        Arc::new(
            DeviceNodeBuilder::new()
                .with_namespace("openebs")
                .with_name(name)
                .build()
                .unwrap(),
        )
    }

    fn trigger() -> (TriggerSource, WorkQueue<String>) {
        let queue = WorkQueue::new(WorkQueueConfig::new("test"));
        let trigger = TriggerSource::new(NodeKey::new("openebs", "node-1"), queue.clone());
        (trigger, queue)
    }

    #[test]
    fn test_local_events_enqueue_key() {
        let (trigger, queue) = trigger();
        assert!(trigger.handle(&Notification::Added(node("node-1"))));
        assert!(trigger.handle(&Notification::Updated {
            old: node("node-1"),
            new: node("node-1"),
        }));
        assert!(trigger.handle(&Notification::Deleted(DeletedRecord::Tombstone {
            key: NodeKey::new("openebs", "node-1"),
            last_known: node("node-1"),
        })));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_foreign_key_is_dropped() {
        let (trigger, queue) = trigger();
        assert!(!trigger.handle(&Notification::Added(node("node-2"))));
        assert!(!trigger.enqueue(&NodeKey::new("other", "node-1")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_record_enqueues_for_recreation() {
        let (trigger, queue) = trigger();
        trigger.on_notification(Notification::Deleted(DeletedRecord::Live(node("node-1"))));
        assert_eq!(queue.get().await, Some("openebs/node-1".to_string()));
    }
}
