//! Access to `DnsExtension` objects in the management cluster
//!
//! All writes are JSON merge patches: finalizer lists are computed from a
//! fresh read, and status patches spell out every field (including nulls)
//! so stale values are cleared instead of merged.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use dns_lifecycle_common::crd::{DnsExtension, DnsExtensionStatus, ExtensionKey};
use dns_lifecycle_common::{Error, FINALIZER, OPERATION_ANNOTATION, PLANNED_OPERATION_ANNOTATION};

/// Trait abstracting Kubernetes operations on `DnsExtension`
///
/// Allows mocking the client in tests while using the real client in
/// production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExtensionClient: Send + Sync {
    /// Fetch the current object; `None` if it no longer exists
    async fn get(&self, key: &ExtensionKey) -> Result<Option<DnsExtension>, Error>;

    /// Add the controller finalizer (no-op if present)
    async fn add_finalizer(&self, key: &ExtensionKey) -> Result<(), Error>;

    /// Remove the controller finalizer (no-op if absent or the object is gone)
    async fn remove_finalizer(&self, key: &ExtensionKey) -> Result<(), Error>;

    /// Replace the status block
    async fn patch_status(&self, key: &ExtensionKey, status: &DnsExtensionStatus)
        -> Result<(), Error>;

    /// Drop the operation and planned-operation annotations
    async fn clear_operation_annotations(&self, key: &ExtensionKey) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeExtensionClient {
    client: Client,
    field_manager: String,
}

impl KubeExtensionClient {
    /// Create a client using the given field manager for patches
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, key: &ExtensionKey) -> Api<DnsExtension> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }

    fn params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager)
    }
}

#[async_trait]
impl ExtensionClient for KubeExtensionClient {
    async fn get(&self, key: &ExtensionKey) -> Result<Option<DnsExtension>, Error> {
        Ok(self.api(key).get_opt(&key.name).await?)
    }

    async fn add_finalizer(&self, key: &ExtensionKey) -> Result<(), Error> {
        let api = self.api(key);

        let ext = api.get(&key.name).await?;
        let mut finalizers = ext.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(&key.name, &self.params(), &Patch::Merge(&patch))
            .await?;
        debug!(extension = %key, "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ExtensionKey) -> Result<(), Error> {
        let api = self.api(key);

        let Some(ext) = api.get_opt(&key.name).await? else {
            return Ok(());
        };
        let current = ext.metadata.finalizers.unwrap_or_default();
        if !current.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        let finalizers: Vec<String> = current.into_iter().filter(|f| f != FINALIZER).collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        match api
            .patch(&key.name, &self.params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        debug!(extension = %key, "removed finalizer");
        Ok(())
    }

    async fn patch_status(
        &self,
        key: &ExtensionKey,
        status: &DnsExtensionStatus,
    ) -> Result<(), Error> {
        // Explicit nulls so a cleared lastError actually disappears
        let patch = serde_json::json!({
            "status": {
                "observedGeneration": status.observed_generation,
                "lastOperation": status.last_operation,
                "lastError": status.last_error,
                "conditions": status.conditions,
            }
        });
        self.api(key)
            .patch_status(&key.name, &self.params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn clear_operation_annotations(&self, key: &ExtensionKey) -> Result<(), Error> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(OPERATION_ANNOTATION.to_string(), serde_json::Value::Null);
        annotations.insert(
            PLANNED_OPERATION_ANNOTATION.to_string(),
            serde_json::Value::Null,
        );
        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations
            }
        });
        match self
            .api(key)
            .patch(&key.name, &self.params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
