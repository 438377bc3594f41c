//! DeviceNode Synchronization Daemon
//!
//! This crate keeps one DeviceNode record per node converged with the block
//! devices actually present on that node. It is level-triggered: record
//! changes and a periodic resync both enqueue the local node's key, and a
//! reconciliation pass always compares full desired state against full
//! observed state.
//!
//! # Features
//!
//! - **default**: Redis record store backend
//! - **redis**: Enable [`devnode_common::RedisStore`]
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AU-3 | Content of Audit Records | Structured logging with record keys |
//! | AU-12 | Audit Record Generation | Every record write is logged |
//! | CM-6 | Configuration Settings | Validated TOML configuration |
//! | CM-8 | System Component Inventory | Publish the node's storage devices |
//! | CP-10 | System Recovery | Periodic resync, requeue with backoff |
//! | SI-7 | Information Integrity | Optimistic concurrency on writes |
//! | SI-10 | Input Validation | Foreign and malformed keys are rejected |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ watch  ┌──────────┐ notify ┌───────────────┐
//! │ RecordStore  │───────▶│ Informer │───────▶│ TriggerSource │
//! └──────────────┘        └────┬─────┘        └───────┬───────┘
//!        ▲                     │ fills                │ add(key)
//!        │                     ▼                      ▼
//!        │              ┌─────────────┐  resync ┌───────────┐
//!        │              │ RecordCache │ ───────▶│ WorkQueue │
//!        │              └──────┬──────┘  timer  └─────┬─────┘
//!        │ create/update       │ get                  │ get/done
//!        │              ┌──────▼──────┐         ┌─────▼─────┐
//!        └──────────────│ Reconciler  │◀────────│  Workers  │
//!                       └──────┬──────┘         └───────────┘
//!                              │ list
//!                       ┌──────▼─────────┐
//!                       │ DeviceProvider │
//!                       └────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod config_file;
pub mod controller;
pub mod error;
pub mod informer;
pub mod owner_ref;
pub mod reconciler;
pub mod sysfs;
pub mod trigger;
pub mod worker;

pub use cache::RecordCache;
pub use config::ControllerConfig;
pub use config_file::{DaemonConfig, ProviderKind, StoreBackend};
pub use controller::{ControllerState, NodeController};
pub use error::{ControllerError, ReconcileError, Result};
pub use informer::{DeletedRecord, Informer, Notification, NotificationHandler};
pub use owner_ref::repair_owner_references;
pub use reconciler::{Reconciler, SyncOutcome};
pub use sysfs::SysfsProvider;
pub use trigger::TriggerSource;
pub use worker::Worker;
