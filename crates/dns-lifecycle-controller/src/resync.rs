//! Periodic resync
//!
//! Every interval, each extension in the local cache is enqueued as a plain
//! reconcile. Keys already waiting merge in the queue, so a slow worker pool
//! never accumulates duplicate resyncs.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::reflector::Store;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dns_lifecycle_common::crd::{DnsExtension, ExtensionKey};

use crate::queue::{OperationHint, ReconcileOperation, Trigger, WorkQueue};

/// Source of the keys to resync
pub trait ExtensionLister: Send + Sync {
    /// Keys of every cached extension
    fn list_keys(&self) -> Vec<ExtensionKey>;
}

impl ExtensionLister for Store<DnsExtension> {
    fn list_keys(&self) -> Vec<ExtensionKey> {
        self.state().iter().map(|ext| ext.key()).collect()
    }
}

/// Re-enqueues the whole cache on a fixed period
pub struct ResyncScheduler {
    lister: Arc<dyn ExtensionLister>,
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl ResyncScheduler {
    /// Create a scheduler; the first resync fires one `interval` after start
    pub fn new(lister: Arc<dyn ExtensionLister>, queue: Arc<WorkQueue>, interval: Duration) -> Self {
        Self {
            lister,
            queue,
            interval,
        }
    }

    /// Enqueue every cached extension once; returns how many were enqueued
    pub fn resync_once(&self) -> usize {
        let keys = self.lister.list_keys();
        let count = keys.len();
        for key in keys {
            self.queue.add(ReconcileOperation::new(
                key,
                OperationHint::Reconcile,
                Trigger::Resync,
            ));
        }
        count
    }

    /// Tick until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "resync scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("resync scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let count = self.resync_once();
                    debug!(count, "resync enqueued extensions");
                }
            }
        }
    }
}
