//! Applying manifests to the target cluster with inventory-based pruning
//!
//! Every extension owns an inventory: the list of objects last applied on
//! its behalf, stored in a ConfigMap in the target cluster. Apply writes
//! the union of old and new inventory before touching objects, so an
//! interrupted apply never leaves an object untracked. Pruning only deletes
//! what the inventory recorded; nothing is discovered by label scanning.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use dns_lifecycle_common::crd::ExtensionKey;
use dns_lifecycle_common::kube_utils::{kind_priority, sort_for_apply, Manifest, ManifestRef};
use dns_lifecycle_common::{
    Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_OWNER_NAME, LABEL_OWNER_NAMESPACE,
};

/// ConfigMap data key holding the serialized inventory
pub const INVENTORY_KEY: &str = "inventory";

/// How the previous inventory is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Prune objects recorded previously but no longer rendered
    Incremental,
    /// Restore after a migration: prunes like `Incremental`, but an
    /// inventory left corrupt by the handover counts as empty
    Fresh,
}

/// Result of an apply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedSet {
    /// Objects applied, in apply order
    pub applied: Vec<ManifestRef>,
    /// Objects deleted because they were no longer rendered
    pub pruned: Vec<ManifestRef>,
}

/// Owner-scoped apply, removal and inventory lookup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Apply `manifests` for `owner`, pruning per `mode`
    async fn apply(
        &self,
        owner: &ExtensionKey,
        manifests: Vec<Manifest>,
        mode: ApplyMode,
    ) -> Result<AppliedSet, Error>;

    /// Delete everything recorded for `owner`, then the inventory itself
    async fn remove(&self, owner: &ExtensionKey) -> Result<Vec<ManifestRef>, Error>;

    /// Recorded inventory, `None` if none exists
    async fn inventory(&self, owner: &ExtensionKey) -> Result<Option<Vec<ManifestRef>>, Error>;
}

/// Raw object operations against the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetCluster: Send + Sync {
    /// Server-side apply one object
    async fn apply_object(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Delete one object; `Ok(false)` if it was already gone
    async fn delete_object(&self, reference: &ManifestRef) -> Result<bool, Error>;

    /// Read the owner's inventory
    async fn read_inventory(&self, owner: &ExtensionKey)
        -> Result<Option<Vec<ManifestRef>>, Error>;

    /// Replace the owner's inventory
    async fn write_inventory(&self, owner: &ExtensionKey, refs: &[ManifestRef])
        -> Result<(), Error>;

    /// Delete the owner's inventory; absent counts as success
    async fn delete_inventory(&self, owner: &ExtensionKey) -> Result<(), Error>;
}

/// [`ClusterApplier`] implementing inventory bookkeeping over a [`TargetCluster`]
pub struct InventoryApplier {
    target: Arc<dyn TargetCluster>,
}

impl InventoryApplier {
    /// Create an applier over the given target
    pub fn new(target: Arc<dyn TargetCluster>) -> Self {
        Self { target }
    }

    /// Delete objects in reverse apply order, tolerating already-absent ones
    async fn delete_all(&self, owner: &ExtensionKey, refs: &[ManifestRef]) -> Result<(), Error> {
        let mut ordered: Vec<&ManifestRef> = refs.iter().collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(kind_priority(&r.kind)));
        for reference in ordered {
            let existed = self.target.delete_object(reference).await?;
            debug!(extension = %owner, object = %reference, existed, "deleted object");
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApplier for InventoryApplier {
    async fn apply(
        &self,
        owner: &ExtensionKey,
        mut manifests: Vec<Manifest>,
        mode: ApplyMode,
    ) -> Result<AppliedSet, Error> {
        let previous: BTreeSet<ManifestRef> = match self.target.read_inventory(owner).await {
            Ok(refs) => refs.unwrap_or_default().into_iter().collect(),
            Err(e @ Error::Serialization { .. }) if mode == ApplyMode::Fresh => {
                warn!(extension = %owner, error = %e, "discarding corrupt inventory");
                BTreeSet::new()
            }
            Err(e) => return Err(e),
        };

        for manifest in &mut manifests {
            manifest.set_owner_labels(owner);
        }
        sort_for_apply(&mut manifests);

        let current: BTreeSet<ManifestRef> =
            manifests.iter().map(|m| m.reference.clone()).collect();
        if current.len() != manifests.len() {
            return Err(Error::permanent_config_for(
                owner.to_string(),
                "rendered manifests contain duplicate objects",
            ));
        }

        let tracked: Vec<ManifestRef> = previous.union(&current).cloned().collect();
        self.target.write_inventory(owner, &tracked).await?;

        let mut applied = Vec::with_capacity(manifests.len());
        for manifest in &manifests {
            self.target.apply_object(manifest).await?;
            applied.push(manifest.reference.clone());
        }

        let stale: Vec<ManifestRef> = previous.difference(&current).cloned().collect();
        self.delete_all(owner, &stale).await?;

        let current: Vec<ManifestRef> = current.into_iter().collect();
        self.target.write_inventory(owner, &current).await?;

        if !stale.is_empty() {
            info!(extension = %owner, pruned = stale.len(), "pruned stale objects");
        }
        Ok(AppliedSet {
            applied,
            pruned: stale,
        })
    }

    async fn remove(&self, owner: &ExtensionKey) -> Result<Vec<ManifestRef>, Error> {
        let Some(refs) = self.target.read_inventory(owner).await? else {
            return Ok(Vec::new());
        };
        self.delete_all(owner, &refs).await?;
        self.target.delete_inventory(owner).await?;
        Ok(refs)
    }

    async fn inventory(&self, owner: &ExtensionKey) -> Result<Option<Vec<ManifestRef>>, Error> {
        self.target.read_inventory(owner).await
    }
}

/// [`TargetCluster`] backed by a kube client
pub struct KubeTargetCluster {
    client: Client,
    inventory_namespace: String,
    field_manager: String,
}

impl KubeTargetCluster {
    /// Create a target; inventories live in `inventory_namespace`
    pub fn new(
        client: Client,
        inventory_namespace: impl Into<String>,
        field_manager: impl Into<String>,
    ) -> Self {
        Self {
            client,
            inventory_namespace: inventory_namespace.into(),
            field_manager: field_manager.into(),
        }
    }

    fn inventory_api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.inventory_namespace)
    }

    fn params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }
}

/// Build the inventory ConfigMap for an owner
pub fn inventory_config_map(
    owner: &ExtensionKey,
    namespace: &str,
    refs: &[ManifestRef],
) -> Result<serde_json::Value, Error> {
    let data = serde_json::to_string(refs)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;
    Ok(serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": owner.inventory_name(),
            "namespace": namespace,
            "labels": {
                LABEL_MANAGED_BY: LABEL_MANAGED_BY_VALUE,
                LABEL_OWNER_NAMESPACE: owner.namespace,
                LABEL_OWNER_NAME: owner.name,
            }
        },
        "data": {
            INVENTORY_KEY: data
        }
    }))
}

/// Parse the inventory out of a ConfigMap
pub fn parse_inventory(cm: &ConfigMap) -> Result<Vec<ManifestRef>, Error> {
    let Some(raw) = cm.data.as_ref().and_then(|d| d.get(INVENTORY_KEY)) else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|e| {
        Error::serialization_for_kind("ConfigMap", format!("corrupt inventory: {}", e))
    })
}

#[async_trait]
impl TargetCluster for KubeTargetCluster {
    async fn apply_object(&self, manifest: &Manifest) -> Result<(), Error> {
        let api = manifest.reference.api(self.client.clone());
        api.patch(
            &manifest.reference.name,
            &self.params(),
            &Patch::Apply(&manifest.value),
        )
        .await?;
        debug!(object = %manifest.reference, "applied object");
        Ok(())
    }

    async fn delete_object(&self, reference: &ManifestRef) -> Result<bool, Error> {
        let api = reference.api(self.client.clone());
        match api
            .delete(&reference.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_inventory(
        &self,
        owner: &ExtensionKey,
    ) -> Result<Option<Vec<ManifestRef>>, Error> {
        match self.inventory_api().get_opt(&owner.inventory_name()).await? {
            Some(cm) => parse_inventory(&cm).map(Some),
            None => Ok(None),
        }
    }

    async fn write_inventory(
        &self,
        owner: &ExtensionKey,
        refs: &[ManifestRef],
    ) -> Result<(), Error> {
        let cm = inventory_config_map(owner, &self.inventory_namespace, refs)?;
        self.inventory_api()
            .patch(&owner.inventory_name(), &self.params(), &Patch::Apply(&cm))
            .await?;
        Ok(())
    }

    async fn delete_inventory(&self, owner: &ExtensionKey) -> Result<(), Error> {
        match self
            .inventory_api()
            .delete(&owner.inventory_name(), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manifest, FakeTargetCluster};

    fn owner() -> ExtensionKey {
        ExtensionKey::new("shoot--dev", "dns")
    }

    fn applier(target: &Arc<FakeTargetCluster>) -> InventoryApplier {
        InventoryApplier::new(target.clone())
    }

    #[tokio::test]
    async fn apply_records_inventory_and_labels_objects() {
        let target = Arc::new(FakeTargetCluster::default());
        let result = applier(&target)
            .apply(
                &owner(),
                vec![manifest("Deployment", "dns"), manifest("ServiceAccount", "dns")],
                ApplyMode::Incremental,
            )
            .await
            .unwrap();

        let kinds: Vec<_> = result.applied.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ServiceAccount", "Deployment"]);
        assert!(result.pruned.is_empty());
        assert_eq!(target.inventory_of(&owner()).unwrap().len(), 2);

        let obj = target.object(&result.applied[1]).unwrap();
        assert_eq!(obj["metadata"]["labels"][LABEL_OWNER_NAME], "dns");
    }

    /// Story: applying the same render twice changes nothing
    #[tokio::test]
    async fn story_apply_is_idempotent() {
        let target = Arc::new(FakeTargetCluster::default());
        let manifests = vec![manifest("ConfigMap", "cfg"), manifest("Deployment", "dns")];

        applier(&target)
            .apply(&owner(), manifests.clone(), ApplyMode::Incremental)
            .await
            .unwrap();
        let snapshot = target.snapshot();

        let second = applier(&target)
            .apply(&owner(), manifests, ApplyMode::Incremental)
            .await
            .unwrap();
        assert!(second.pruned.is_empty());
        assert_eq!(target.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn objects_dropped_from_render_are_pruned() {
        let target = Arc::new(FakeTargetCluster::default());
        applier(&target)
            .apply(
                &owner(),
                vec![manifest("ConfigMap", "cfg"), manifest("DNSEntry", "api")],
                ApplyMode::Incremental,
            )
            .await
            .unwrap();

        let result = applier(&target)
            .apply(&owner(), vec![manifest("ConfigMap", "cfg")], ApplyMode::Incremental)
            .await
            .unwrap();
        assert_eq!(result.pruned.len(), 1);
        assert_eq!(result.pruned[0].kind, "DNSEntry");
        assert!(target.object(&result.pruned[0]).is_none());
        assert_eq!(target.inventory_of(&owner()).unwrap().len(), 1);
    }

    /// Story: objects kept through a handover but no longer rendered are
    /// still owned by the restoring instance and get pruned
    #[tokio::test]
    async fn story_fresh_mode_prunes_kept_objects() {
        let target = Arc::new(FakeTargetCluster::default());
        applier(&target)
            .apply(
                &owner(),
                vec![manifest("ConfigMap", "old"), manifest("DNSEntry", "api")],
                ApplyMode::Incremental,
            )
            .await
            .unwrap();

        let result = applier(&target)
            .apply(&owner(), vec![manifest("ConfigMap", "new")], ApplyMode::Fresh)
            .await
            .unwrap();
        let mut pruned: Vec<_> = result.pruned.iter().map(|r| r.name.as_str()).collect();
        pruned.sort_unstable();
        assert_eq!(pruned, vec!["api", "old"]);
        assert_eq!(target.snapshot().len(), 1);
        let inventory = target.inventory_of(&owner()).unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].name, "new");
    }

    #[tokio::test]
    async fn corrupt_inventory_only_tolerated_in_fresh_mode() {
        let mut mock = MockTargetCluster::new();
        mock.expect_read_inventory().returning(|_| {
            Err(Error::serialization_for_kind("ConfigMap", "corrupt inventory"))
        });
        mock.expect_write_inventory().returning(|_, _| Ok(()));
        mock.expect_apply_object().returning(|_| Ok(()));
        let applier = InventoryApplier::new(Arc::new(mock));

        let err = applier
            .apply(&owner(), vec![manifest("ConfigMap", "a")], ApplyMode::Incremental)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));

        let result = applier
            .apply(&owner(), vec![manifest("ConfigMap", "a")], ApplyMode::Fresh)
            .await
            .unwrap();
        assert_eq!(result.applied.len(), 1);
        assert!(result.pruned.is_empty());
    }

    #[tokio::test]
    async fn unavailable_inventory_fails_fresh_apply() {
        let mut mock = MockTargetCluster::new();
        mock.expect_read_inventory()
            .returning(|_| Err(Error::transient("connection reset")));
        let err = InventoryApplier::new(Arc::new(mock))
            .apply(&owner(), vec![manifest("ConfigMap", "a")], ApplyMode::Fresh)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// Story: a crash mid-apply leaves every object tracked
    #[tokio::test]
    async fn story_failed_apply_keeps_union_inventory() {
        let target = Arc::new(FakeTargetCluster::default());
        applier(&target)
            .apply(&owner(), vec![manifest("ConfigMap", "a")], ApplyMode::Incremental)
            .await
            .unwrap();

        target.fail_next_applies(1);
        let err = applier(&target)
            .apply(&owner(), vec![manifest("ConfigMap", "b")], ApplyMode::Incremental)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let names: Vec<_> = target
            .inventory_of(&owner())
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_objects_are_rejected() {
        let target = Arc::new(FakeTargetCluster::default());
        let err = applier(&target)
            .apply(
                &owner(),
                vec![manifest("ConfigMap", "a"), manifest("ConfigMap", "a")],
                ApplyMode::Incremental,
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(target.inventory_of(&owner()).is_none());
    }

    #[tokio::test]
    async fn remove_deletes_everything_and_is_idempotent() {
        let target = Arc::new(FakeTargetCluster::default());
        applier(&target)
            .apply(
                &owner(),
                vec![manifest("ServiceAccount", "dns"), manifest("Deployment", "dns")],
                ApplyMode::Incremental,
            )
            .await
            .unwrap();

        // Someone deleted one object by hand: 404 counts as success
        let gone = target.inventory_of(&owner()).unwrap()[0].clone();
        target.delete_by_hand(&gone);

        let removed = applier(&target).remove(&owner()).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(target.snapshot().is_empty());
        assert!(target.inventory_of(&owner()).is_none());

        let again = applier(&target).remove(&owner()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_in_reverse_apply_order() {
        let mut mock = MockTargetCluster::new();
        let refs = vec![
            manifest("ServiceAccount", "dns").reference,
            manifest("Deployment", "dns").reference,
            manifest("ClusterRole", "dns").reference,
        ];
        mock.expect_read_inventory()
            .returning(move |_| Ok(Some(refs.clone())));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = order.clone();
        mock.expect_delete_object().returning(move |r| {
            seen.lock().push(r.kind.clone());
            Ok(true)
        });
        mock.expect_delete_inventory().times(1).returning(|_| Ok(()));

        InventoryApplier::new(Arc::new(mock))
            .remove(&owner())
            .await
            .unwrap();
        assert_eq!(
            *order.lock(),
            vec!["Deployment", "ClusterRole", "ServiceAccount"]
        );
    }

    #[test]
    fn inventory_config_map_round_trips_through_parse() {
        let refs = vec![manifest("ConfigMap", "a").reference];
        let value = inventory_config_map(&owner(), "kube-system", &refs).unwrap();
        assert_eq!(value["metadata"]["name"], "dns-ext-shoot--dev-dns");
        assert_eq!(value["metadata"]["labels"][LABEL_OWNER_NAMESPACE], "shoot--dev");
        let cm: ConfigMap = serde_json::from_value(value).unwrap();
        assert_eq!(parse_inventory(&cm).unwrap(), refs);
    }

    #[test]
    fn corrupt_inventory_is_reported() {
        let cm = ConfigMap {
            data: Some([(INVENTORY_KEY.to_string(), "not json".to_string())].into()),
            ..Default::default()
        };
        assert!(parse_inventory(&cm).is_err());
    }
}
