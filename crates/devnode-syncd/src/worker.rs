//! Worker loop: pulls keys from the work queue and reconciles them.

use devnode_common::WorkQueue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::reconciler::Reconciler;

/// Marks a key done when dropped, including on unwind.
struct InFlight<'a> {
    queue: &'a WorkQueue<String>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// One reconciliation worker.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
}

impl Worker {
    /// Creates worker `id` over `queue`.
    pub fn new(id: usize, queue: WorkQueue<String>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            id,
            queue,
            reconciler,
        }
    }

    /// Processes items until the queue shuts down and drains.
    pub async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while self.process_next_work_item().await {}
        debug!(worker = self.id, "Worker stopped");
    }

    /// Processes one item. Returns false once the queue has shut down.
    ///
    /// On success the key's backoff history is cleared; on failure the key
    /// is requeued with backoff. Either way the key is marked done.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let in_flight = InFlight {
            queue: &self.queue,
            key,
        };
        let key = &in_flight.key;

        match self.reconciler.sync_handler(key).await {
            Ok(outcome) => {
                self.queue.forget(key);
                info!(worker = self.id, %key, ?outcome, "Successfully synced");
            }
            Err(e) => {
                self.queue.add_rate_limited(key.clone());
                warn!(
                    worker = self.id,
                    %key,
                    requeues = self.queue.num_requeues(key),
                    error = %e,
                    "Error syncing device node, requeuing"
                );
            }
        }
        true
    }
}
