//! Deduplicating, rate-limited work queue.
//!
//! The queue hands out reconciliation keys to a pool of workers with two
//! guarantees:
//!
//! - a key is pending at most once, no matter how often it is added
//! - a key is processed by at most one worker at a time; adds that arrive
//!   while it is being processed are coalesced into a single re-queue that
//!   happens when the worker calls [`WorkQueue::done`]
//!
//! # Deduplication Logic
//!
//! ```text
//!   add(k)      k not known      -> dirty + queued
//!   add(k)      k dirty          -> no-op
//!   add(k)      k processing     -> dirty only (re-queued on done)
//!   get()       pops k           -> processing, no longer dirty
//!   done(k)     k dirty again    -> queued
//! ```
//!
//! Failed keys go back through [`WorkQueue::add_rate_limited`], which waits
//! for a per-key exponential backoff before adding them again.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::rate_limit::{BackoffConfig, ExponentialBackoff};

/// Configuration for a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Queue name (for logging)
    pub name: String,
    /// Backoff bounds for rate-limited re-adds
    pub backoff: BackoffConfig,
}

impl WorkQueueConfig {
    /// Creates a new queue config with default backoff.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the backoff bounds.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

#[derive(Debug)]
struct QueueState<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            shutting_down: false,
        }
    }
}

#[derive(Debug)]
struct Shared<K> {
    name: String,
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: ExponentialBackoff<K>,
    shutdown: CancellationToken,
}

/// A deduplicating work queue with per-key rate limiting.
///
/// `WorkQueue` is a cheap handle; clones share the same queue. All methods
/// take `&self` and synchronize internally.
#[derive(Debug)]
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Creates a new empty queue.
    pub fn new(config: WorkQueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                backoff: ExponentialBackoff::new(config.backoff),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Marks `key` as needing processing.
    ///
    /// Idempotent while the key is pending. If the key is being processed,
    /// it is queued again once the worker calls [`done`](Self::done).
    /// Ignored after shutdown.
    pub fn add(&self, key: K) {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                trace!(queue = %self.shared.name, ?key, "Ignoring add after shutdown");
                return;
            }
            if !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.shared.notify.notify_one();
    }

    /// Waits for the next key.
    ///
    /// Returns `None` once the queue is shut down and drained. The returned
    /// key is held until [`done`](Self::done) is called for it.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = std::pin::pin!(self.shared.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks processing of `key` as finished.
    ///
    /// If `key` was added again while it was being processed, it becomes
    /// pending immediately.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.shared.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };

        if requeued {
            self.shared.notify.notify_one();
        }
    }

    /// Adds `key` after `delay`. The add is dropped if the queue shuts down
    /// first.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let shutdown = self.shared.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key),
                _ = shutdown.cancelled() => {}
            }
        });
    }

    /// Adds `key` after its backoff delay, recording one more failure for it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.backoff.when(&key);
        debug!(
            queue = %self.shared.name,
            ?key,
            delay_ms = delay.as_millis() as u64,
            requeues = self.shared.backoff.num_requeues(&key),
            "Requeuing with backoff"
        );
        self.add_after(key, delay);
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.shared.backoff.forget(key);
    }

    /// Returns how many consecutive failures are recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.backoff.num_requeues(key)
    }

    /// Shuts the queue down.
    ///
    /// Further adds are ignored and pending delayed adds are dropped. Keys
    /// already queued are still handed out; once they are gone, blocked and
    /// future [`get`](Self::get) calls return `None`.
    pub fn shut_down(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!(queue = %self.shared.name, "Shutting down work queue");
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();
    }

    /// Returns true once [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Returns the number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Returns true if no key is waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of keys currently held by workers.
    pub fn processing_count(&self) -> usize {
        self.shared.state.lock().processing.len()
    }
}
