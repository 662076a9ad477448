//! Controller wiring: watch → filter → queue → workers → actuator
//!
//! A fixed pool of workers drains the queue. Transient failures are re-added
//! after a per-key backoff; anything else resets the key's backoff. On
//! cancellation the queue stops handing out work and every worker finishes
//! its current operation before returning.

use std::sync::Arc;

use kube::{Api, Client};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use dns_lifecycle_common::crd::DnsExtension;

use crate::actuator::{Actuator, ActuatorConfig, Outcome};
use crate::applier::{
    InventoryApplier, KubeTargetCluster, ManifestComponentApplier, MiniJinjaRenderer,
    TemplateSource,
};
use crate::client::KubeExtensionClient;
use crate::config::ControllerConfig;
use crate::filter::{filter, Decision, FilterConfig, Notification, RejectReason};
use crate::queue::{BackoffLimiter, ReconcileOperation, Trigger, WorkQueue};
use crate::resync::ResyncScheduler;
use crate::source::WatchSource;

/// The lifecycle controller
pub struct Controller {
    config: ControllerConfig,
    filter: FilterConfig,
    actuator: Arc<Actuator>,
    queue: Arc<WorkQueue>,
    limiter: Arc<BackoffLimiter>,
}

impl Controller {
    /// Create a controller around an actuator
    pub fn new(config: ControllerConfig, actuator: Arc<Actuator>) -> Self {
        let filter = config.filter_config();
        let limiter = Arc::new(BackoffLimiter::new(config.backoff.clone()));
        Self {
            config,
            filter,
            actuator,
            queue: Arc::new(WorkQueue::new()),
            limiter,
        }
    }

    /// Wire the real clients: `management` hosts the `DnsExtension`s,
    /// `target` receives the component
    pub fn from_clients(config: ControllerConfig, management: Client, target: Client) -> Self {
        let source = match &config.template_dir {
            Some(dir) => TemplateSource::Directory(dir.clone()),
            None => TemplateSource::Embedded,
        };
        let renderer = Arc::new(MiniJinjaRenderer::new(source, &config.target_namespace));
        let cluster = Arc::new(InventoryApplier::new(Arc::new(KubeTargetCluster::new(
            target,
            &config.inventory_namespace,
            &config.field_manager,
        ))));
        let component = Arc::new(ManifestComponentApplier::new(
            renderer,
            cluster,
            &config.template_set,
            config.values.clone(),
            &config.target_namespace,
        ));
        let client = Arc::new(KubeExtensionClient::new(management, &config.field_manager));
        let actuator = Arc::new(Actuator::new(
            client,
            component,
            ActuatorConfig::from(&config),
        ));
        Self::new(config, actuator)
    }

    /// The shared work queue
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run a notification through the filter; returns whether it was enqueued
    pub fn enqueue(&self, notification: &Notification) -> bool {
        let key = notification.object().key();
        match filter(notification, &self.filter) {
            Decision::Accept(hint) => {
                debug!(extension = %key, %hint, "enqueued");
                self.queue
                    .add(ReconcileOperation::new(key, hint, Trigger::Event));
                true
            }
            Decision::Reject(RejectReason::Removed) => {
                self.limiter.forget(&key);
                trace!(extension = %key, "removed from cluster");
                false
            }
            Decision::Reject(reason) => {
                trace!(extension = %key, ?reason, "filtered");
                false
            }
        }
    }

    /// Watch `api`, resync periodically and process until `cancel` fires
    pub async fn run(&self, api: Api<DnsExtension>, cancel: CancellationToken) {
        let source = WatchSource::new(api);
        let resync = ResyncScheduler::new(
            Arc::new(source.store()),
            self.queue.clone(),
            self.config.resync_interval,
        );
        info!(
            workers = self.config.workers,
            migration_mode = %self.config.migration_mode,
            extension_type = %self.config.extension_type,
            "controller starting"
        );

        tokio::join!(
            source.run(
                |notification| {
                    self.enqueue(&notification);
                },
                cancel.clone(),
            ),
            resync.run(cancel.clone()),
            self.run_workers(cancel.clone()),
        );
        info!("controller stopped");
    }

    /// Run the worker pool until `cancel` fires and in-flight work is done
    pub async fn run_workers(&self, cancel: CancellationToken) {
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(worker(
                id,
                self.queue.clone(),
                self.limiter.clone(),
                self.actuator.clone(),
            ));
        }

        cancel.cancelled().await;
        debug!("shutting down work queue");
        self.queue.shutdown();

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

#[instrument(skip(queue, limiter, actuator))]
async fn worker(
    id: usize,
    queue: Arc<WorkQueue>,
    limiter: Arc<BackoffLimiter>,
    actuator: Arc<Actuator>,
) {
    while let Some(op) = queue.get().await {
        let attempt = limiter.attempts(&op.key) + 1;
        match actuator.process(&op, attempt).await {
            Outcome::Done => limiter.forget(&op.key),
            Outcome::RetryWithBackoff => {
                let (failures, delay) = limiter.next_delay(&op.key);
                debug!(
                    extension = %op.key,
                    failures,
                    delay_secs = delay.as_secs_f64(),
                    "requeueing after backoff"
                );
                queue.add_after(
                    ReconcileOperation::new(op.key.clone(), op.hint, Trigger::Retry),
                    delay,
                );
            }
        }
        queue.done(&op.key);
    }
    trace!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use dns_lifecycle_common::crd::{ExtensionKey, OperationState, OperationType};
    use dns_lifecycle_common::retry::RetryConfig;
    use dns_lifecycle_common::Error;

    use crate::applier::{AppliedSet, ApplyMode, ComponentApplier};
    use crate::config::MigrationMode;
    use crate::testing::{extension, FakeExtensionClient, FakeTargetCluster};

    fn test_config(workers: usize) -> ControllerConfig {
        let mut config = ControllerConfig::new(MigrationMode::KeepManagedObjects);
        config.workers = workers;
        config.backoff = RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        config
    }

    fn controller(
        config: ControllerConfig,
        client: Arc<FakeExtensionClient>,
        component: Arc<dyn ComponentApplier>,
    ) -> Arc<Controller> {
        let actuator = Arc::new(Actuator::new(client, component, ActuatorConfig::from(&config)));
        Arc::new(Controller::new(config, actuator))
    }

    fn created(ext: DnsExtension) -> Notification {
        Notification::Applied {
            old: None,
            new: Arc::new(ext),
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    /// Story: three transient failures, then success; each retry waits at
    /// least as long as the one before and the backoff resets afterwards
    #[tokio::test(start_paused = true)]
    async fn story_transient_failures_back_off_then_succeed() {
        let client = Arc::new(FakeExtensionClient::default());
        let target = Arc::new(FakeTargetCluster::default());
        let component = Arc::new(ManifestComponentApplier::new(
            Arc::new(MiniJinjaRenderer::new(TemplateSource::Embedded, "kube-system")),
            Arc::new(InventoryApplier::new(target.clone())),
            "shoot-dns-service",
            json!({}),
            "kube-system",
        ));
        let ctrl = controller(test_config(2), client.clone(), component);
        let key = ExtensionKey::new("shoot--dev", "dns");
        client.insert(extension("dns", 1));
        target.fail_next_applies(3);

        let cancel = CancellationToken::new();
        let runner = {
            let ctrl = ctrl.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ctrl.run_workers(cancel).await })
        };

        let started = tokio::time::Instant::now();
        assert!(ctrl.enqueue(&created(client.current(&key).unwrap())));

        wait_for(|| {
            client
                .current(&key)
                .and_then(|e| e.last_operation().cloned())
                .is_some_and(|op| op.state == OperationState::Succeeded)
        })
        .await;

        // 10ms + 20ms + 40ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(70));
        let ext = client.current(&key).unwrap();
        assert_eq!(ext.last_operation().unwrap().type_, OperationType::Create);
        assert_eq!(ext.observed_generation(), Some(1));
        assert_eq!(client.status_writes(), 4);
        assert_eq!(ctrl.limiter.attempts(&key), 0);

        cancel.cancel();
        runner.await.unwrap();
    }

    /// Component that tracks how many applies run at once, per key and overall
    #[derive(Default)]
    struct ProbeComponent {
        in_flight: Mutex<HashMap<ExtensionKey, usize>>,
        max_per_key: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        applies: AtomicUsize,
    }

    #[async_trait]
    impl ComponentApplier for ProbeComponent {
        async fn apply(&self, ext: &DnsExtension, _mode: ApplyMode) -> Result<AppliedSet, Error> {
            let key = ext.key();
            {
                let mut in_flight = self.in_flight.lock();
                let n = in_flight.entry(key.clone()).or_insert(0);
                *n += 1;
                self.max_per_key.fetch_max(*n, Ordering::SeqCst);
            }
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(20)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            if let Some(n) = self.in_flight.lock().get_mut(&key) {
                *n -= 1;
            }
            self.applies.fetch_add(1, Ordering::SeqCst);
            Ok(AppliedSet::default())
        }

        async fn remove(&self, _ext: &DnsExtension) -> Result<(), Error> {
            Ok(())
        }

        async fn has_managed_objects(&self, _key: &ExtensionKey) -> Result<bool, Error> {
            Ok(false)
        }
    }

    /// Story: a burst of events for a few extensions keeps every key on a
    /// single worker while different keys run side by side
    #[tokio::test(start_paused = true)]
    async fn story_one_worker_per_key() {
        let client = Arc::new(FakeExtensionClient::default());
        let probe = Arc::new(ProbeComponent::default());
        let ctrl = controller(test_config(4), client.clone(), probe.clone());

        let names = ["a", "b", "c"];
        for name in names {
            client.insert(extension(name, 1));
        }

        let cancel = CancellationToken::new();
        let runner = {
            let ctrl = ctrl.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ctrl.run_workers(cancel).await })
        };

        for round in 0..5 {
            for name in names {
                let ext = client.current(&ExtensionKey::new("shoot--dev", name)).unwrap();
                let mut newer = ext.clone();
                newer.metadata.generation = Some(ext.generation() + round + 1);
                let notification = Notification::Applied {
                    old: Some(Arc::new(ext)),
                    new: Arc::new(newer),
                };
                assert!(ctrl.enqueue(&notification));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        wait_for(|| ctrl.queue().is_empty() && probe.running.load(Ordering::SeqCst) == 0).await;

        assert_eq!(probe.max_per_key.load(Ordering::SeqCst), 1);
        assert!(probe.max_running.load(Ordering::SeqCst) > 1);
        // Bursts merge while a key is busy
        assert!(probe.applies.load(Ordering::SeqCst) < 15);

        cancel.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn filtered_notifications_are_not_enqueued() {
        let client = Arc::new(FakeExtensionClient::default());
        let ctrl = controller(test_config(1), client, Arc::new(ProbeComponent::default()));

        let ext = Arc::new(extension("dns", 1));
        let status_only = Notification::Applied {
            old: Some(ext.clone()),
            new: ext.clone(),
        };
        assert!(!ctrl.enqueue(&status_only));

        let mut other = extension("other", 1);
        other.spec.type_ = "someone-else".to_string();
        assert!(!ctrl.enqueue(&created(other)));
        assert!(ctrl.queue().is_empty());
    }

    #[tokio::test]
    async fn removal_resets_backoff() {
        let client = Arc::new(FakeExtensionClient::default());
        let ctrl = controller(test_config(1), client, Arc::new(ProbeComponent::default()));
        let ext = extension("dns", 1);
        let key = ext.key();

        ctrl.limiter.next_delay(&key);
        ctrl.limiter.next_delay(&key);
        assert_eq!(ctrl.limiter.attempts(&key), 2);

        assert!(!ctrl.enqueue(&Notification::Removed(Arc::new(ext))));
        assert_eq!(ctrl.limiter.attempts(&key), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let client = Arc::new(FakeExtensionClient::default());
        let ctrl = controller(test_config(3), client, Arc::new(ProbeComponent::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), ctrl.run_workers(cancel))
            .await
            .unwrap();
        assert!(ctrl.queue().is_shutting_down());
    }
}
