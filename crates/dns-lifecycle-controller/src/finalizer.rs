//! Finalizer gating
//!
//! The finalizer is held while managed objects may exist in the target
//! cluster. A teardown release refuses to drop it while the inventory still
//! records objects; a handover release (migration keeping objects alive)
//! drops it unconditionally since another instance takes ownership.

use std::sync::Arc;

use tracing::{debug, error};

use dns_lifecycle_common::crd::DnsExtension;
use dns_lifecycle_common::Error;

use crate::applier::ComponentApplier;
use crate::client::ExtensionClient;

/// Why the finalizer is being released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Component removed; objects must be gone
    Teardown,
    /// Objects stay behind for another controller instance
    Handover,
}

/// Adds and releases the controller finalizer
pub struct FinalizerManager {
    client: Arc<dyn ExtensionClient>,
    component: Arc<dyn ComponentApplier>,
}

impl FinalizerManager {
    /// Create a manager
    pub fn new(client: Arc<dyn ExtensionClient>, component: Arc<dyn ComponentApplier>) -> Self {
        Self { client, component }
    }

    /// Add the finalizer unless present or the resource is being deleted
    pub async fn ensure_present(&self, ext: &DnsExtension) -> Result<(), Error> {
        if ext.is_being_deleted() || ext.has_finalizer() {
            return Ok(());
        }
        let key = ext.key();
        self.client.add_finalizer(&key).await?;
        debug!(extension = %key, "finalizer added");
        Ok(())
    }

    /// Remove the finalizer
    pub async fn release(&self, ext: &DnsExtension, reason: ReleaseReason) -> Result<(), Error> {
        let key = ext.key();
        if reason == ReleaseReason::Teardown && self.component.has_managed_objects(&key).await? {
            // Teardown reported success but left objects behind
            error!(extension = %key, "managed objects remain after teardown");
            return Err(Error::precondition_failed(
                key.to_string(),
                "managed objects still exist; refusing to release finalizer",
            ));
        }
        self.client.remove_finalizer(&key).await?;
        debug!(extension = %key, ?reason, "finalizer released");
        Ok(())
    }
}
