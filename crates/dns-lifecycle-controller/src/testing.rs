//! In-memory fakes shared by the unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use dns_lifecycle_common::crd::{DnsExtension, DnsExtensionSpec, DnsExtensionStatus, ExtensionKey};
use dns_lifecycle_common::kube_utils::{Manifest, ManifestRef};
use dns_lifecycle_common::{
    Error, DEFAULT_EXTENSION_TYPE, FINALIZER, OPERATION_ANNOTATION, PLANNED_OPERATION_ANNOTATION,
};

use crate::applier::TargetCluster;
use crate::client::ExtensionClient;

/// A fresh extension in namespace `shoot--dev`
pub fn extension(name: &str, generation: i64) -> DnsExtension {
    let mut ext = DnsExtension::new(
        name,
        DnsExtensionSpec {
            type_: DEFAULT_EXTENSION_TYPE.to_string(),
            provider_config: None,
        },
    );
    ext.metadata.namespace = Some("shoot--dev".to_string());
    ext.metadata.generation = Some(generation);
    ext.metadata.uid = Some(format!("uid-{name}"));
    ext
}

/// A minimal manifest of the given kind in `kube-system`
pub fn manifest(kind: &str, name: &str) -> Manifest {
    let api_version = match kind {
        "Deployment" | "DaemonSet" | "StatefulSet" => "apps/v1",
        "ClusterRole" | "ClusterRoleBinding" | "Role" | "RoleBinding" => {
            "rbac.authorization.k8s.io/v1"
        }
        "DNSEntry" => "dns.gardener.cloud/v1alpha1",
        _ => "v1",
    };
    let value = json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {"name": name},
    });
    match Manifest::from_value(value, "kube-system") {
        Ok(m) => m,
        Err(e) => panic!("test manifest {kind}/{name} is invalid: {e}"),
    }
}

fn unavailable() -> Error {
    Error::transient("target cluster unavailable")
}

/// Target cluster keeping objects and inventories in memory
#[derive(Default)]
pub struct FakeTargetCluster {
    objects: Mutex<BTreeMap<ManifestRef, Value>>,
    inventories: Mutex<HashMap<ExtensionKey, Vec<ManifestRef>>>,
    failing_applies: AtomicU32,
}

impl FakeTargetCluster {
    /// Make the next `n` object applies fail transiently
    pub fn fail_next_applies(&self, n: u32) {
        self.failing_applies.store(n, Ordering::SeqCst);
    }

    /// Recorded inventory for `owner`
    pub fn inventory_of(&self, owner: &ExtensionKey) -> Option<Vec<ManifestRef>> {
        self.inventories.lock().get(owner).cloned()
    }

    /// Live object body
    pub fn object(&self, reference: &ManifestRef) -> Option<Value> {
        self.objects.lock().get(reference).cloned()
    }

    /// Every live object
    pub fn snapshot(&self) -> BTreeMap<ManifestRef, Value> {
        self.objects.lock().clone()
    }

    /// Delete an object behind the controller's back
    pub fn delete_by_hand(&self, reference: &ManifestRef) {
        self.objects.lock().remove(reference);
    }
}

#[async_trait]
impl TargetCluster for FakeTargetCluster {
    async fn apply_object(&self, manifest: &Manifest) -> Result<(), Error> {
        let failing = self.failing_applies.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_applies.store(failing - 1, Ordering::SeqCst);
            return Err(unavailable());
        }
        self.objects
            .lock()
            .insert(manifest.reference.clone(), manifest.value.clone());
        Ok(())
    }

    async fn delete_object(&self, reference: &ManifestRef) -> Result<bool, Error> {
        Ok(self.objects.lock().remove(reference).is_some())
    }

    async fn read_inventory(
        &self,
        owner: &ExtensionKey,
    ) -> Result<Option<Vec<ManifestRef>>, Error> {
        Ok(self.inventory_of(owner))
    }

    async fn write_inventory(
        &self,
        owner: &ExtensionKey,
        refs: &[ManifestRef],
    ) -> Result<(), Error> {
        self.inventories.lock().insert(owner.clone(), refs.to_vec());
        Ok(())
    }

    async fn delete_inventory(&self, owner: &ExtensionKey) -> Result<(), Error> {
        self.inventories.lock().remove(owner);
        Ok(())
    }
}

/// Management cluster keeping `DnsExtension`s in memory
///
/// Mimics the API server's garbage collection: an object with a deletion
/// timestamp disappears as soon as its last finalizer is removed.
#[derive(Default)]
pub struct FakeExtensionClient {
    objects: Mutex<HashMap<ExtensionKey, DnsExtension>>,
    status_writes: AtomicU32,
    failing_status_writes: AtomicU32,
}

impl FakeExtensionClient {
    /// Store an object as-is
    pub fn insert(&self, ext: DnsExtension) {
        self.objects.lock().insert(ext.key(), ext);
    }

    /// Current object
    pub fn current(&self, key: &ExtensionKey) -> Option<DnsExtension> {
        self.objects.lock().get(key).cloned()
    }

    /// Number of status patches accepted
    pub fn status_writes(&self) -> u32 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` status patches fail transiently
    pub fn fail_next_status_writes(&self, n: u32) {
        self.failing_status_writes.store(n, Ordering::SeqCst);
    }

    /// Request deletion like `kubectl delete` would
    pub fn request_deletion(&self, key: &ExtensionKey) {
        let mut objects = self.objects.lock();
        let Some(finalized) = objects.get(key).map(no_finalizers) else {
            return;
        };
        if finalized {
            objects.remove(key);
        } else if let Some(ext) = objects.get_mut(key) {
            ext.metadata.deletion_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
        }
    }

    /// Bump the generation like a spec change would
    pub fn update_spec(&self, key: &ExtensionKey, f: impl FnOnce(&mut DnsExtension)) {
        if let Some(ext) = self.objects.lock().get_mut(key) {
            f(ext);
            ext.metadata.generation = Some(ext.generation() + 1);
        }
    }

    /// Set an annotation
    pub fn annotate(&self, key: &ExtensionKey, name: &str, value: &str) {
        if let Some(ext) = self.objects.lock().get_mut(key) {
            ext.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(name.to_string(), value.to_string());
        }
    }

    fn not_found(key: &ExtensionKey) -> Error {
        Error::not_found("DnsExtension", key.to_string())
    }
}

fn no_finalizers(ext: &DnsExtension) -> bool {
    ext.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty())
}

#[async_trait]
impl ExtensionClient for FakeExtensionClient {
    async fn get(&self, key: &ExtensionKey) -> Result<Option<DnsExtension>, Error> {
        Ok(self.current(key))
    }

    async fn add_finalizer(&self, key: &ExtensionKey) -> Result<(), Error> {
        let mut objects = self.objects.lock();
        let ext = objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        let finalizers = ext.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == FINALIZER) {
            finalizers.push(FINALIZER.to_string());
        }
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ExtensionKey) -> Result<(), Error> {
        let mut objects = self.objects.lock();
        let Some(ext) = objects.get_mut(key) else {
            return Ok(());
        };
        if let Some(finalizers) = ext.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != FINALIZER);
        }
        let collect = ext.is_being_deleted() && no_finalizers(ext);
        if collect {
            objects.remove(key);
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        key: &ExtensionKey,
        status: &DnsExtensionStatus,
    ) -> Result<(), Error> {
        let failing = self.failing_status_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_status_writes.store(failing - 1, Ordering::SeqCst);
            return Err(Error::transient("status subresource unavailable"));
        }
        let mut objects = self.objects.lock();
        let ext = objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        ext.status = Some(status.clone());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_operation_annotations(&self, key: &ExtensionKey) -> Result<(), Error> {
        if let Some(ext) = self.objects.lock().get_mut(key) {
            if let Some(annotations) = ext.metadata.annotations.as_mut() {
                annotations.remove(OPERATION_ANNOTATION);
                annotations.remove(PLANNED_OPERATION_ANNOTATION);
            }
        }
        Ok(())
    }
}
