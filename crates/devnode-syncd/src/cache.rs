//! Local read cache of DeviceNode records.
//!
//! Filled by the informer from list and watch results. Readers get shared
//! `Arc<DeviceNode>` handles and must copy before modifying.

use devnode_common::{DeviceNode, NodeKey, WatchEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::informer::{DeletedRecord, Notification};

/// Cached view of the records in one namespace.
#[derive(Debug)]
pub struct RecordCache {
    records: RwLock<HashMap<NodeKey, Arc<DeviceNode>>>,
    synced: watch::Sender<bool>,
}

impl RecordCache {
    /// Creates an empty, unsynced cache.
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            records: RwLock::new(HashMap::new()),
            synced,
        }
    }

    /// Returns the cached record for `key`.
    pub fn get(&self, key: &NodeKey) -> Option<Arc<DeviceNode>> {
        self.records.read().get(key).cloned()
    }

    /// Returns the cached keys, sorted.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<_> = self.records.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of cached records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once the first list has been loaded.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the first list has been loaded.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    pub(crate) fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Replaces the cache contents with a fresh list.
    ///
    /// Returns the notifications describing the difference: `Added` for new
    /// keys, `Updated` for keys already cached and a tombstone for every
    /// cached key missing from the list.
    pub(crate) fn replace(&self, items: Vec<DeviceNode>) -> Vec<Notification> {
        let mut records = self.records.write();
        let mut previous = std::mem::take(&mut *records);
        let mut notifications = Vec::with_capacity(items.len() + previous.len());

        for item in items {
            let key = item.key();
            let new = Arc::new(item);
            records.insert(key.clone(), Arc::clone(&new));
            match previous.remove(&key) {
                Some(old) => notifications.push(Notification::Updated { old, new }),
                None => notifications.push(Notification::Added(new)),
            }
        }

        let mut vanished: Vec<_> = previous.into_iter().collect();
        vanished.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, last_known) in vanished {
            notifications.push(Notification::Deleted(DeletedRecord::Tombstone {
                key,
                last_known,
            }));
        }

        notifications
    }

    /// Applies a watch event, returning the resulting notification.
    ///
    /// Events older than the cached version are ignored.
    pub(crate) fn apply(&self, event: WatchEvent) -> Option<Notification> {
        let mut records = self.records.write();
        match event {
            WatchEvent::Added(node) | WatchEvent::Modified(node) => {
                let key = node.key();
                if let Some(cached) = records.get(&key) {
                    if is_stale(cached, &node) {
                        return None;
                    }
                }
                let new = Arc::new(node);
                match records.insert(key, Arc::clone(&new)) {
                    Some(old) => Some(Notification::Updated { old, new }),
                    None => Some(Notification::Added(new)),
                }
            }
            WatchEvent::Deleted(node) => {
                records.remove(&node.key());
                Some(Notification::Deleted(DeletedRecord::Live(Arc::new(node))))
            }
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `incoming` carries an older numeric version than `cached`.
fn is_stale(cached: &DeviceNode, incoming: &DeviceNode) -> bool {
    let parse = |node: &DeviceNode| node.resource_version()?.parse::<u64>().ok();
    matches!((parse(cached), parse(incoming)), (Some(c), Some(i)) if i < c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnode_common::DeviceNodeBuilder;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_pending, assert_ready, task};

    fn node(name: &str, version: &str) -> DeviceNode {
        let mut node = DeviceNodeBuilder::new()
            .with_namespace("openebs")
            .with_name(name)
            .build()
            .unwrap();
        node.metadata.resource_version = Some(version.to_string());
        node
    }

    #[test]
    fn test_replace_reports_added_updated_and_tombstones() {
        let cache = RecordCache::new();
        cache.replace(vec![node("a", "1"), node("b", "2")]);

        let notifications = cache.replace(vec![node("a", "3"), node("c", "4")]);
        assert_eq!(notifications.len(), 3);
        assert!(matches!(&notifications[0], Notification::Updated { old, new }
            if old.resource_version() == Some("1") && new.resource_version() == Some("3")));
        assert!(matches!(&notifications[1], Notification::Added(n) if n.metadata.name == "c"));
        assert!(matches!(&notifications[2],
            Notification::Deleted(DeletedRecord::Tombstone { key, .. }) if key.name == "b"));

        assert_eq!(
            cache.keys(),
            vec![NodeKey::new("openebs", "a"), NodeKey::new("openebs", "c")]
        );
    }

    #[test]
    fn test_apply_ignores_stale_events() {
        let cache = RecordCache::new();
        cache.replace(vec![node("a", "5")]);

        assert!(cache.apply(WatchEvent::Modified(node("a", "4"))).is_none());
        assert!(cache.apply(WatchEvent::Modified(node("a", "6"))).is_some());

        let cached = cache.get(&NodeKey::new("openebs", "a")).unwrap();
        assert_eq!(cached.resource_version(), Some("6"));
    }

    #[test]
    fn test_apply_delete_removes_record() {
        let cache = RecordCache::new();
        cache.apply(WatchEvent::Added(node("a", "1")));
        assert_eq!(cache.len(), 1);

        let notification = cache.apply(WatchEvent::Deleted(node("a", "1")));
        assert!(matches!(notification, Some(Notification::Deleted(DeletedRecord::Live(_)))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_wait_synced_wakes_on_first_list() {
        let cache = RecordCache::new();
        assert!(!cache.has_synced());

        let mut wait = task::spawn(cache.wait_synced());
        assert_pending!(wait.poll());

        cache.mark_synced();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
        assert!(cache.has_synced());
    }
}
