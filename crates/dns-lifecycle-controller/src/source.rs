//! Watch adapter
//!
//! Turns the kube-rs watcher stream into [`Notification`]s carrying the
//! previously cached version, which the event filter needs. The reflector
//! store doubles as the resync cache.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dns_lifecycle_common::crd::{DnsExtension, ExtensionKey};

use crate::filter::Notification;

/// Watcher timeout (seconds); below the client read timeout so idle watches
/// are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Applies watcher events to the cache and reports what changed
pub struct EventTranslator {
    store: Store<DnsExtension>,
    writer: reflector::store::Writer<DnsExtension>,
    relisted: HashSet<ExtensionKey>,
}

impl EventTranslator {
    /// Create a translator with an empty cache
    pub fn new() -> Self {
        let (store, writer) = reflector::store();
        Self {
            store,
            writer,
            relisted: HashSet::new(),
        }
    }

    /// Read handle to the cache
    pub fn store(&self) -> Store<DnsExtension> {
        self.store.clone()
    }

    /// Update the cache with `event` and return the resulting notifications
    ///
    /// Objects missing from a completed re-list are reported as removed,
    /// since their delete events were lost while the watch was down.
    pub fn handle(&mut self, event: watcher::Event<DnsExtension>) -> Vec<Notification> {
        let notifications = match &event {
            watcher::Event::Apply(obj) => vec![self.applied(obj)],
            watcher::Event::InitApply(obj) => {
                self.relisted.insert(obj.key());
                vec![self.applied(obj)]
            }
            watcher::Event::Delete(obj) => vec![Notification::Removed(Arc::new(obj.clone()))],
            watcher::Event::Init => {
                self.relisted.clear();
                vec![]
            }
            watcher::Event::InitDone => {
                let relisted = std::mem::take(&mut self.relisted);
                self.store
                    .state()
                    .into_iter()
                    .filter(|ext| !relisted.contains(&ext.key()))
                    .map(Notification::Removed)
                    .collect()
            }
        };
        self.writer.apply_watcher_event(&event);
        notifications
    }

    fn applied(&self, obj: &DnsExtension) -> Notification {
        Notification::Applied {
            old: self.store.get(&ObjectRef::from_obj(obj)),
            new: Arc::new(obj.clone()),
        }
    }
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches `DnsExtension`s and feeds notifications to a callback
pub struct WatchSource {
    api: Api<DnsExtension>,
    translator: EventTranslator,
}

impl WatchSource {
    /// Create a source over `api`
    pub fn new(api: Api<DnsExtension>) -> Self {
        Self {
            api,
            translator: EventTranslator::new(),
        }
    }

    /// Read handle to the cache maintained by this source
    pub fn store(&self) -> Store<DnsExtension> {
        self.translator.store()
    }

    /// Stream events until `cancel` fires or the watch ends
    ///
    /// Watch errors are logged; the watcher reconnects with backoff.
    pub async fn run<F>(mut self, mut on_notification: F, cancel: CancellationToken)
    where
        F: FnMut(Notification) + Send,
    {
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = watcher(self.api.clone(), config).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("watch cancelled");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        for notification in self.translator.handle(event) {
                            on_notification(notification);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "watch error, reconnecting"),
                    None => {
                        debug!("watch stream ended");
                        break;
                    }
                }
            }
        }
    }
}
