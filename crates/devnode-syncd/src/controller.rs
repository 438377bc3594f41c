//! DeviceNode controller - wires the informer, trigger, work queue, workers
//! and resync timer together.
//!
//! # Lifecycle
//!
//! ```text
//! Initializing ──cache synced──▶ Running ──shutdown──▶ Draining ──▶ Stopped
//!       │                                                              ▲
//!       └────────────── cache sync timeout ────────────────────────────┘
//! ```
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CP-10: System Recovery - Periodic resync converges after any failure
//! - SI-4: System Monitoring - Continuous reconciliation
//! - AU-12: Audit Record Generation - Lifecycle transitions are logged

use devnode_common::{DeviceProvider, RecordStore, WorkQueue, WorkQueueConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::RecordCache;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::informer::{Informer, NotificationHandler};
use crate::reconciler::Reconciler;
use crate::trigger::TriggerSource;
use crate::worker::Worker;

/// Name of the controller's work queue
pub const QUEUE_NAME: &str = "DeviceNode";

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Waiting for the record cache to sync
    Initializing,
    /// Workers and resync timer are running
    Running,
    /// Shutdown requested; workers are finishing their current items
    Draining,
    /// All tasks have exited
    Stopped,
}

/// Controller keeping the local node's DeviceNode record converged.
pub struct NodeController {
    config: ControllerConfig,
    store: Arc<dyn RecordStore>,
    cache: Arc<RecordCache>,
    queue: WorkQueue<String>,
    trigger: Arc<TriggerSource>,
    reconciler: Arc<Reconciler>,
    state: watch::Sender<ControllerState>,
}

impl NodeController {
    /// Creates a controller. Fails if `config` does not validate.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn DeviceProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(RecordCache::new());
        let queue = WorkQueue::new(WorkQueueConfig::new(QUEUE_NAME).with_backoff(config.backoff));
        let trigger = Arc::new(TriggerSource::new(config.identity.clone(), queue.clone()));
        let reconciler = Arc::new(Reconciler::new(
            cache.clone(),
            store.clone(),
            provider,
            config.owner.clone(),
        ));
        let (state, _) = watch::channel(ControllerState::Initializing);

        Ok(Self {
            config,
            store,
            cache,
            queue,
            trigger,
            reconciler,
            state,
        })
    }

    /// Returns the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the record cache.
    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    /// Returns the work queue.
    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Runs the controller until `shutdown` is cancelled.
    ///
    /// Returns [`ControllerError::CacheSyncTimeout`] if the record cache does
    /// not sync within the configured deadline. On shutdown the resync timer
    /// stops, workers drain the keys already queued and finish their current
    /// item, and only then does this return.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(identity = %self.config.identity, "Starting DeviceNode controller");

        let informer_token = shutdown.child_token();
        let informer = Informer::new(
            self.store.clone(),
            self.cache.clone(),
            self.config.identity.namespace.clone(),
            self.config.relist_delay,
        );
        let handler: Arc<dyn NotificationHandler> = self.trigger.clone();
        let informer_task = tokio::spawn(informer.run(handler, informer_token.clone()));

        let result = self.run_synced(&shutdown).await;

        self.set_state(ControllerState::Draining);
        self.queue.shut_down();
        informer_token.cancel();
        if let Err(e) = informer_task.await {
            warn!(error = %e, "Record informer task failed");
        }

        self.set_state(ControllerState::Stopped);
        info!("Shutting down DeviceNode controller");
        result
    }

    async fn run_synced(&self, shutdown: &CancellationToken) -> Result<()> {
        info!("Waiting for informer caches to sync");
        self.wait_for_cache_sync(shutdown).await?;

        info!(workers = self.config.workers, "Starting workers");
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(self.worker(id).run());
        }
        let mut next_id = self.config.workers;
        self.set_state(ControllerState::Running);
        info!("Started workers");

        let key = self.config.identity.to_string();
        // The first tick completes immediately.
        let mut resync = tokio::time::interval(self.config.poll_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = resync.tick() => self.queue.add(key.clone()),
                Some(exited) = workers.join_next() => {
                    if let Err(e) = exited {
                        error!(error = %e, "Worker exited unexpectedly, restarting");
                    }
                    if !self.queue.is_shutting_down() {
                        workers.spawn(self.worker(next_id).run());
                        next_id += 1;
                    }
                }
            }
        }

        info!("Stopping workers");
        self.set_state(ControllerState::Draining);
        self.queue.shut_down();
        while let Some(exited) = workers.join_next().await {
            if let Err(e) = exited {
                warn!(error = %e, "Worker failed during shutdown");
            }
        }
        Ok(())
    }

    async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> Result<()> {
        let timeout = self.config.cache_sync_timeout;
        tokio::select! {
            synced = tokio::time::timeout(timeout, self.cache.wait_synced()) => {
                synced.map_err(|_| {
                    error!(?timeout, "Failed to wait for caches to sync");
                    ControllerError::CacheSyncTimeout(timeout)
                })
            }
            _ = shutdown.cancelled() => {
                warn!("Shutdown requested before caches synced");
                Err(ControllerError::CacheSyncTimeout(timeout))
            }
        }
    }

    fn worker(&self, id: usize) -> Worker {
        Worker::new(id, self.queue.clone(), self.reconciler.clone())
    }

    fn set_state(&self, state: ControllerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(?previous, current = ?state, "Controller state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnode_common::{
        Device, DeviceNode, MemoryStore, NodeKey, OwnerReference, RecordList, StaticProvider,
        StoreResult, WatchEvent, WatchStream,
    };
    use futures::StreamExt;
    use std::time::Duration;

    fn config() -> ControllerConfig {
        ControllerConfig::new(
            NodeKey::new("openebs", "node-1"),
            OwnerReference::controller_ref("v1", "Node", "node-1", "node-uid"),
        )
    }

    /// A store whose list never completes.
    struct HangingStore;

    #[async_trait::async_trait]
    impl RecordStore for HangingStore {
        async fn get(&self, _key: &NodeKey) -> StoreResult<Option<DeviceNode>> {
            Ok(None)
        }

        async fn list(&self, _namespace: &str) -> StoreResult<RecordList> {
            std::future::pending().await
        }

        async fn create(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
            Ok(node.clone())
        }

        async fn update(&self, node: &DeviceNode) -> StoreResult<DeviceNode> {
            Ok(node.clone())
        }

        async fn watch(&self, _namespace: &str) -> StoreResult<WatchStream> {
            Ok(futures::stream::pending::<WatchEvent>().boxed())
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = NodeController::new(
            config().with_workers(0),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticProvider::new(vec![])),
        );
        assert!(matches!(result, Err(ControllerError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sync_timeout_is_fatal() {
        let controller = NodeController::new(
            config().with_cache_sync_timeout(Duration::from_secs(5)),
            Arc::new(HangingStore),
            Arc::new(StaticProvider::new(vec![])),
        )
        .unwrap();

        let err = controller.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::CacheSyncTimeout(_)));
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_initial_resync_creates_record() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(
            NodeController::new(
                config(),
                store.clone(),
                Arc::new(StaticProvider::new(vec![Device::new("sda", "/dev/sda", 512)])),
            )
            .unwrap(),
        );
        let shutdown = CancellationToken::new();
        let task = {
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        let mut state = controller.subscribe_state();
        state.wait_for(|s| *s == ControllerState::Running).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.queue().is_shutting_down());
    }
}
