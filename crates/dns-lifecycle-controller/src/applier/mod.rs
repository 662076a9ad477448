//! Component applier: render + apply as one idempotent operation
//!
//! Values handed to the templates are the static controller values with
//! the extension's identity and provider config laid on top:
//!
//! ```yaml
//! image: ...            # static values (with built-in defaults)
//! namespace: kube-system
//! resourcePrefix: dns-<namespace>-<name>
//! extension: {name, namespace, generation}
//! providerConfig: {...} # spec.providerConfig, {} when unset
//! ```

mod cluster;
mod renderer;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use dns_lifecycle_common::crd::{DnsExtension, ExtensionKey};
use dns_lifecycle_common::Error;

pub use cluster::{
    inventory_config_map, parse_inventory, AppliedSet, ApplyMode, ClusterApplier,
    InventoryApplier, KubeTargetCluster, TargetCluster, INVENTORY_KEY,
};
pub use renderer::{MiniJinjaRenderer, TemplateRenderer, TemplateSource};

#[cfg(test)]
pub use cluster::MockClusterApplier;
#[cfg(test)]
pub use renderer::MockTemplateRenderer;

/// Image used when the static values don't name one
pub const DEFAULT_IMAGE: &str =
    "europe-docker.pkg.dev/gardener-project/releases/dns-controller-manager:v0.18.0";

/// Install, update and teardown of one extension's component
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentApplier: Send + Sync {
    /// Render and apply the component for `ext`
    async fn apply(&self, ext: &DnsExtension, mode: ApplyMode) -> Result<AppliedSet, Error>;

    /// Delete every object recorded for `ext`
    async fn remove(&self, ext: &DnsExtension) -> Result<(), Error>;

    /// Whether any recorded object may still exist
    async fn has_managed_objects(&self, key: &ExtensionKey) -> Result<bool, Error>;
}

/// [`ComponentApplier`] rendering a template set and applying it by owner
pub struct ManifestComponentApplier {
    renderer: Arc<dyn TemplateRenderer>,
    cluster: Arc<dyn ClusterApplier>,
    template_set: String,
    static_values: Value,
    target_namespace: String,
}

impl ManifestComponentApplier {
    /// Create an applier
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        cluster: Arc<dyn ClusterApplier>,
        template_set: impl Into<String>,
        static_values: Value,
        target_namespace: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            cluster,
            template_set: template_set.into(),
            static_values,
            target_namespace: target_namespace.into(),
        }
    }

    /// Values tree for rendering `ext`
    pub fn values_for(&self, ext: &DnsExtension) -> Result<Value, Error> {
        let key = ext.key();
        let provider_config = match &ext.spec.provider_config {
            None | Some(Value::Null) => json!({}),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => {
                return Err(Error::permanent_config_for_field(
                    key.to_string(),
                    "spec.providerConfig",
                    "provider config must be an object",
                ))
            }
        };

        let mut values = json!({
            "image": DEFAULT_IMAGE,
            "replicas": 1,
        });
        deep_merge(&mut values, &self.static_values);
        deep_merge(
            &mut values,
            &json!({
                "namespace": self.target_namespace,
                "resourcePrefix": format!("dns-{}-{}", key.namespace, key.name),
                "extension": {
                    "name": key.name,
                    "namespace": key.namespace,
                    "generation": ext.generation(),
                },
            }),
        );
        // Replaced wholesale: a merge would resurrect keys the user removed
        if let Some(obj) = values.as_object_mut() {
            obj.insert("providerConfig".to_string(), provider_config);
        }
        Ok(values)
    }
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                match base.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        base.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[async_trait]
impl ComponentApplier for ManifestComponentApplier {
    async fn apply(&self, ext: &DnsExtension, mode: ApplyMode) -> Result<AppliedSet, Error> {
        let key = ext.key();
        let values = self.values_for(ext)?;
        let manifests = self.renderer.render(&self.template_set, &values).await?;
        debug!(extension = %key, manifests = manifests.len(), ?mode, "applying component");

        let result = self.cluster.apply(&key, manifests, mode).await?;
        info!(
            extension = %key,
            applied = result.applied.len(),
            pruned = result.pruned.len(),
            "component applied"
        );
        Ok(result)
    }

    async fn remove(&self, ext: &DnsExtension) -> Result<(), Error> {
        let key = ext.key();
        let removed = self.cluster.remove(&key).await?;
        info!(extension = %key, removed = removed.len(), "component removed");
        Ok(())
    }

    async fn has_managed_objects(&self, key: &ExtensionKey) -> Result<bool, Error> {
        Ok(self
            .cluster
            .inventory(key)
            .await?
            .is_some_and(|refs| !refs.is_empty()))
    }
}
