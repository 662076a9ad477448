//! Deduplicating work queue with per-extension exclusivity
//!
//! An extension key is either waiting (in `pending`), being processed, or
//! both: a key that changes while a worker holds it is parked as dirty and
//! becomes ready again only after [`WorkQueue::done`]. Two workers never see
//! the same key at the same time. There is no ordering across keys.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use dns_lifecycle_common::crd::ExtensionKey;
use dns_lifecycle_common::retry::RetryConfig;

/// What the producer thinks should happen
///
/// Only a hint: the actuator re-derives the operation from the current
/// object. When several hints pile up for one key the strongest wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationHint {
    /// Install or update
    Reconcile,
    /// Re-install after migration
    Restore,
    /// Hand over
    Migrate,
    /// Tear down
    Delete,
}

impl std::fmt::Display for OperationHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconcile => write!(f, "reconcile"),
            Self::Restore => write!(f, "restore"),
            Self::Migrate => write!(f, "migrate"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Why an item was enqueued
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Watch notification accepted by the filter
    Event,
    /// Periodic resync
    Resync,
    /// Backoff retry after a transient failure
    Retry,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Resync => write!(f, "resync"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// One unit of work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOperation {
    /// Extension to process
    pub key: ExtensionKey,
    /// Producer's hint
    pub hint: OperationHint,
    /// Producer
    pub trigger: Trigger,
}

impl ReconcileOperation {
    /// Create an operation
    pub fn new(key: ExtensionKey, hint: OperationHint, trigger: Trigger) -> Self {
        Self { key, hint, trigger }
    }

    fn merge(&mut self, other: ReconcileOperation) {
        if other.hint > self.hint {
            self.hint = other.hint;
        }
        // Events carry more information than resyncs or retries
        if other.trigger == Trigger::Event {
            self.trigger = Trigger::Event;
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ExtensionKey>,
    pending: HashMap<ExtensionKey, ReconcileOperation>,
    processing: HashSet<ExtensionKey>,
    shutting_down: bool,
}

/// Shared work queue
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an operation, merging with one already waiting for the key
    pub fn add(&self, op: ReconcileOperation) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if let Some(existing) = state.pending.get_mut(&op.key) {
            existing.merge(op);
            return;
        }
        let key = op.key.clone();
        state.pending.insert(key.clone(), op);
        if !state.processing.contains(&key) {
            state.ready.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue an operation once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, op: ReconcileOperation, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(op);
        });
    }

    /// Wait for the next ready operation; `None` once shut down
    ///
    /// The returned key is exclusively held until [`WorkQueue::done`].
    pub async fn get(&self) -> Option<ReconcileOperation> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.ready.pop_front() {
                    if let Some(op) = state.pending.remove(&key) {
                        state.processing.insert(key);
                        let more = !state.ready.is_empty();
                        drop(state);
                        if more {
                            self.notify.notify_one();
                        }
                        return Some(op);
                    }
                }
            }

            notified.await;
        }
    }

    /// Release a key taken by [`WorkQueue::get`]
    ///
    /// If the key was re-added meanwhile it becomes ready again.
    pub fn done(&self, key: &ExtensionKey) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.pending.contains_key(key) && !state.shutting_down {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out work and wake every waiting worker
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys waiting (ready or dirty)
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a worker currently holds the key
    pub fn is_processing(&self, key: &ExtensionKey) -> bool {
        self.state.lock().processing.contains(key)
    }
}

/// Per-key exponential backoff for transient failures
///
/// The n-th consecutive failure waits `min(base * mult^(n-1), max)`; a
/// success resets the key via [`BackoffLimiter::forget`].
pub struct BackoffLimiter {
    config: RetryConfig,
    failures: Mutex<HashMap<ExtensionKey, u32>>,
}

impl BackoffLimiter {
    /// Create a limiter with the given curve
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return `(attempt, delay)` for it
    pub fn next_delay(&self, key: &ExtensionKey) -> (u32, Duration) {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        (*count, self.config.delay_for_attempt(*count))
    }

    /// Consecutive failures recorded for the key
    pub fn attempts(&self, key: &ExtensionKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Reset the key after a success or when it disappears
    pub fn forget(&self, key: &ExtensionKey) {
        self.failures.lock().remove(key);
    }
}
