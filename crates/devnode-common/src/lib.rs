//! Common abstractions for DeviceNode inventory reconciliation.
//!
//! This crate provides the types and building blocks shared by the
//! reconciliation daemon and its tests:
//!
//! - [`DeviceNode`], [`Device`], [`OwnerReference`], [`NodeKey`]: the record model
//! - [`SemanticEq`]: explicit structural equality for record contents
//! - [`WorkQueue`]: deduplicating, rate-limited queue of reconciliation keys
//! - [`RecordStore`]: keyed store with optimistic concurrency and watch
//! - [`DeviceProvider`]: source of the devices present on the node
//!
//! # Architecture
//!
//! ```text
//!   RecordStore ──watch──▶ cache/informer ──notifications──▶ trigger filter
//!                                                                 │
//!   resync timer ─────────────────────────────────────────────▶ WorkQueue
//!                                                                 │
//!   DeviceProvider ──list──▶ reconciler ◀──────── workers ◀───────┘
//!                               │
//!                               └──create/update──▶ RecordStore
//! ```
//!
//! # Example
//!
//! ```
//! use devnode_common::{WorkQueue, WorkQueueConfig};
//!
//! # tokio_test::block_on(async {
//! let queue: WorkQueue<String> = WorkQueue::new(WorkQueueConfig::new("devicenode"));
//! queue.add("openebs/node-1".to_string());
//! queue.add("openebs/node-1".to_string());
//! assert_eq!(queue.len(), 1);
//!
//! let key = queue.get().await.unwrap();
//! queue.forget(&key);
//! queue.done(&key);
//! # });
//! ```

pub mod equality;
pub mod error;
pub mod provider;
pub mod queue;
pub mod rate_limit;
pub mod store;
pub mod types;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use equality::{devices_equal, SemanticEq};
pub use error::{KeyError, ProviderError, ProviderResult, StoreError, StoreResult};
pub use provider::{DeviceProvider, StaticProvider};
pub use queue::{WorkQueue, WorkQueueConfig};
pub use rate_limit::{BackoffConfig, ExponentialBackoff};
pub use store::{MemoryStore, RecordList, RecordStore, WatchEvent, WatchStream};
pub use types::{Device, DeviceNode, DeviceNodeBuilder, NodeKey, ObjectMeta, OwnerReference};

#[cfg(feature = "redis")]
pub use redis_store::{RedisStore, RedisStoreConfig};
