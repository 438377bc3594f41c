//! Record store abstraction and the in-memory implementation.
//!
//! The store is keyed by [`NodeKey`] and owns the version token of every
//! record. `update` is a compare-and-set on that token: submitting a record
//! whose `resource_version` is not the stored one fails with
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{DeviceNode, NodeKey};

/// Change observed on a watched namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A record was created.
    Added(DeviceNode),
    /// A record was updated.
    Modified(DeviceNode),
    /// A record was deleted; carries its final state.
    Deleted(DeviceNode),
}

impl WatchEvent {
    /// Returns the record carried by the event.
    pub fn record(&self) -> &DeviceNode {
        match self {
            WatchEvent::Added(node) | WatchEvent::Modified(node) | WatchEvent::Deleted(node) => {
                node
            }
        }
    }
}

/// Stream of watch events. The stream ends when the watch breaks; callers
/// relist and watch again.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Snapshot of a namespace.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    /// Records in the namespace
    pub items: Vec<DeviceNode>,
}

/// Keyed persistent storage for [`DeviceNode`] records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the record for `key`, or `None` if it does not exist.
    async fn get(&self, key: &NodeKey) -> StoreResult<Option<DeviceNode>>;

    /// Lists all records in `namespace`.
    async fn list(&self, namespace: &str) -> StoreResult<RecordList>;

    /// Creates `node`. Fails with [`StoreError::AlreadyExists`] if a record
    /// with the same key exists. Returns the stored record with
    /// store-assigned metadata filled in.
    async fn create(&self, node: &DeviceNode) -> StoreResult<DeviceNode>;

    /// Replaces the stored record with `node` if `node` carries the current
    /// version token. Returns the stored record with its new version.
    async fn update(&self, node: &DeviceNode) -> StoreResult<DeviceNode>;

    /// Watches changes in `namespace` made after the call.
    async fn watch(&self, namespace: &str) -> StoreResult<WatchStream>;
}

const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<NodeKey, DeviceNode>,
    last_version: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

/// In-process record store.
///
/// Versions increase monotonically across all records. Watchers receive
/// every change; a watcher that falls behind by more than the channel
/// capacity sees its stream end and is expected to relist.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    /// Deletes the record for `key`, returning its final state.
    ///
    /// Models deletion by an external actor; the controller itself never
    /// deletes records.
    pub fn delete(&self, key: &NodeKey) -> StoreResult<DeviceNode> {
        let removed = self
            .state
            .lock()
            .records
            .remove(key)
            .ok_or_else(|| StoreError::not_found(key.to_string()))?;
        self.publish(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &NodeKey) -> StoreResult<Option<DeviceNode>> {
        Ok(self.state.lock().records.get(key).cloned())
    }

    async fn list(&self, namespace: &str) -> StoreResult<RecordList> {
        let state = self.state.lock();
        let items = state
            .records
            .values()
            .filter(|node| node.metadata.namespace == namespace)
            .cloned()
            .collect();
        Ok(RecordList { items })
    }

    async fn create(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
        let key = node.key();
        let stored = {
            let mut state = self.state.lock();
            if state.records.contains_key(&key) {
                return Err(StoreError::already_exists(key.to_string()));
            }

            let mut stored = node.clone();
            stored.metadata.uid = Some(Uuid::new_v4().to_string());
            stored.metadata.resource_version = Some(state.next_version());
            stored.metadata.creation_timestamp = Some(Utc::now());
            state.records.insert(key.clone(), stored.clone());
            stored
        };

        debug!(%key, version = ?stored.metadata.resource_version, "Created record");
        self.publish(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
        let key = node.key();
        let stored = {
            let mut state = self.state.lock();
            let current = state
                .records
                .get(&key)
                .ok_or_else(|| StoreError::not_found(key.to_string()))?;

            let current_version = current.metadata.resource_version.clone().unwrap_or_default();
            if node.metadata.resource_version.as_deref() != Some(current_version.as_str()) {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    submitted: node.metadata.resource_version.clone(),
                    stored: current_version,
                });
            }

            let mut stored = node.clone();
            // Identity and creation time belong to the store.
            stored.metadata.uid = current.metadata.uid.clone();
            stored.metadata.creation_timestamp = current.metadata.creation_timestamp;
            stored.metadata.resource_version = Some(state.next_version());
            state.records.insert(key.clone(), stored.clone());
            stored
        };

        debug!(%key, version = ?stored.metadata.resource_version, "Updated record");
        self.publish(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn watch(&self, namespace: &str) -> StoreResult<WatchStream> {
        let namespace = namespace.to_string();
        let stream = BroadcastStream::new(self.events.subscribe())
            .take_while(|event| {
                let alive = match event {
                    Ok(_) => true,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "Watcher fell behind, closing watch");
                        false
                    }
                };
                futures::future::ready(alive)
            })
            .filter_map(move |event| {
                let event = event
                    .ok()
                    .filter(|event| event.record().metadata.namespace == namespace);
                futures::future::ready(event)
            });
        Ok(stream.boxed())
    }
}
