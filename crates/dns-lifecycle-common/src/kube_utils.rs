//! Kubernetes helpers for turning rendered YAML into applyable objects
//!
//! Manifests are handled as `serde_json::Value` plus an [`ApiResource`] so
//! arbitrary kinds can be applied through `Api<DynamicObject>` without
//! compile-time types.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use kube::api::{Api, ApiResource, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crd::ExtensionKey;
use crate::{
    Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_OWNER_NAME, LABEL_OWNER_NAMESPACE,
};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the in-cluster / default kubeconfig is inferred.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Identity of one object in the target cluster
///
/// Persisted in the inventory, so the serialized field names are stable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRef {
    /// e.g. `apps/v1`
    pub api_version: String,
    /// e.g. `Deployment`
    pub kind: String,
    /// None for cluster-scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ManifestRef {
    /// API resource used to address this object dynamically
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }

    /// Dynamic API scoped to this object's namespace (or cluster-wide)
    pub fn api(&self, client: Client) -> Api<DynamicObject> {
        dynamic_api(client, &self.api_resource(), self.namespace.as_deref())
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A rendered manifest ready for server-side apply
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Identity of the object
    pub reference: ManifestRef,
    /// Full object body
    pub value: Value,
}

impl Manifest {
    /// Build a manifest from a parsed document
    ///
    /// Namespaced kinds without `metadata.namespace` are placed in
    /// `default_namespace`; cluster-scoped kinds never carry one.
    pub fn from_value(mut value: Value, default_namespace: &str) -> Result<Self, Error> {
        let api_version = required_str(&value, "/apiVersion")?;
        let kind = required_str(&value, "/kind")?;
        let name = required_str(&value, "/metadata/name").map_err(|_| {
            Error::serialization_for_kind(kind.clone(), "manifest missing metadata.name")
        })?;

        let namespace = if is_cluster_scoped(&kind) {
            if let Some(meta) = value.pointer_mut("/metadata").and_then(Value::as_object_mut) {
                meta.remove("namespace");
            }
            None
        } else {
            let ns = value
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .filter(|ns| !ns.is_empty())
                .unwrap_or(default_namespace)
                .to_string();
            if let Some(meta) = value.pointer_mut("/metadata").and_then(Value::as_object_mut) {
                meta.insert("namespace".to_string(), Value::String(ns.clone()));
            }
            Some(ns)
        };

        Ok(Self {
            reference: ManifestRef {
                api_version,
                kind,
                namespace,
                name,
            },
            value,
        })
    }

    /// Label the object as owned by the given extension
    ///
    /// Owner labels make leaked objects traceable even without the inventory.
    pub fn set_owner_labels(&mut self, owner: &ExtensionKey) {
        let Some(meta) = self
            .value
            .pointer_mut("/metadata")
            .and_then(Value::as_object_mut)
        else {
            return;
        };
        let labels = meta
            .entry("labels")
            .or_insert_with(|| Value::Object(Default::default()));
        if !labels.is_object() {
            *labels = Value::Object(Default::default());
        }
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(
                LABEL_MANAGED_BY.to_string(),
                Value::String(LABEL_MANAGED_BY_VALUE.to_string()),
            );
            labels.insert(
                LABEL_OWNER_NAMESPACE.to_string(),
                Value::String(owner.namespace.clone()),
            );
            labels.insert(
                LABEL_OWNER_NAME.to_string(),
                Value::String(owner.name.clone()),
            );
        }
    }
}

fn required_str(value: &Value, pointer: &str) -> Result<String, Error> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::serialization(format!("manifest missing {}", &pointer[1..])))
}

/// Parse a multi-document YAML stream into manifests
pub fn parse_manifests(yaml: &str, default_namespace: &str) -> Result<Vec<Manifest>, Error> {
    crate::yaml::parse_documents(yaml)?
        .into_iter()
        .map(|doc| Manifest::from_value(doc, default_namespace))
        .collect()
}

/// Sort manifests into apply order, stable within a priority class
pub fn sort_for_apply(manifests: &mut [Manifest]) {
    manifests.sort_by_key(|m| kind_priority(&m.reference.kind));
}

/// Parse apiVersion into (group, version)
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Dynamic API for a resource, namespaced when a namespace is given
pub fn dynamic_api(
    client: Client,
    api_resource: &ApiResource,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, api_resource),
        None => Api::all_with(client, api_resource),
    }
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
///
/// Deletion walks the same order in reverse.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "NetworkPolicy" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        "PodDisruptionBudget" | "VerticalPodAutoscaler" => 9,
        _ => 10,
    }
}

/// Whether a kind is cluster-scoped
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "CustomResourceDefinition"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "PriorityClass"
            | "StorageClass"
            | "MutatingWebhookConfiguration"
            | "ValidatingWebhookConfiguration"
    )
}

const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("dnsentry", "dnsentries"),
    ("dnsprovider", "dnsproviders"),
    ("dnsannotation", "dnsannotations"),
    ("networkpolicy", "networkpolicies"),
    ("priorityclass", "priorityclasses"),
    ("storageclass", "storageclasses"),
    ("ingressclass", "ingressclasses"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
