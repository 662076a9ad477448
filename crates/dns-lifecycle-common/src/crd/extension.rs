//! The `DnsExtension` custom resource

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, LastError, LastOperation, LifecycleState, OperationState, OperationType,
};
use crate::{DEFAULT_EXTENSION_TYPE, FINALIZER, OPERATION_ANNOTATION, PLANNED_OPERATION_ANNOTATION};

/// Desired state of the DNS service extension for one tenant cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dns.extensions.dev",
    version = "v1alpha1",
    kind = "DnsExtension",
    namespaced,
    status = "DnsExtensionStatus",
    shortname = "dnsext",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Operation","type":"string","jsonPath":".status.lastOperation.type"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.lastOperation.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DnsExtensionSpec {
    /// Extension type; only resources matching the controller's type are handled
    #[serde(rename = "type", default = "default_extension_type")]
    pub type_: String,

    /// Provider configuration passed through to manifest rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub provider_config: Option<serde_json::Value>,
}

fn default_extension_type() -> String {
    DEFAULT_EXTENSION_TYPE.to_string()
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Observed state written by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsExtensionStatus {
    /// Generation the component was last fully installed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Most recent operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Most recent failure; cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Operation requested through an annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationRequest {
    /// Reconcile now
    Reconcile,
    /// Hand the component over
    Migrate,
    /// Re-install after a handover
    Restore,
}

impl OperationRequest {
    /// Parse an annotation value; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "reconcile" => Some(Self::Reconcile),
            "migrate" => Some(Self::Migrate),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

impl fmt::Display for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile => write!(f, "reconcile"),
            Self::Migrate => write!(f, "migrate"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Namespace/name identity of a `DnsExtension`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionKey {
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
}

impl ExtensionKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name of the inventory ConfigMap recording this extension's objects
    pub fn inventory_name(&self) -> String {
        format!("dns-ext-{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ExtensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&DnsExtension> for ExtensionKey {
    fn from(ext: &DnsExtension) -> Self {
        Self::new(ext.namespace().unwrap_or_default(), ext.name_any())
    }
}

impl DnsExtension {
    /// Identity of this resource
    pub fn key(&self) -> ExtensionKey {
        ExtensionKey::from(self)
    }

    /// `metadata.generation`, 0 when unset
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Whether deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether our finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Parsed user-facing operation annotation
    pub fn operation_annotation(&self) -> Option<OperationRequest> {
        self.annotations()
            .get(OPERATION_ANNOTATION)
            .and_then(|v| OperationRequest::parse(v))
    }

    /// Raw value of the user-facing operation annotation
    pub fn operation_annotation_raw(&self) -> Option<&str> {
        self.annotations().get(OPERATION_ANNOTATION).map(String::as_str)
    }

    /// Parsed planned-operation signal; only migrate and restore are honored
    pub fn planned_operation(&self) -> Option<OperationRequest> {
        self.annotations()
            .get(PLANNED_OPERATION_ANNOTATION)
            .and_then(|v| OperationRequest::parse(v))
            .filter(|op| *op != OperationRequest::Reconcile)
    }

    /// Whether either operation annotation is set, valid or not
    pub fn has_operation_signal(&self) -> bool {
        let annotations = self.annotations();
        annotations.contains_key(OPERATION_ANNOTATION)
            || annotations.contains_key(PLANNED_OPERATION_ANNOTATION)
    }

    /// Most recent operation, if any
    pub fn last_operation(&self) -> Option<&LastOperation> {
        self.status.as_ref().and_then(|s| s.last_operation.as_ref())
    }

    /// Generation the component was last installed for
    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    /// Whether the current generation has been installed successfully
    pub fn is_reconciled(&self) -> bool {
        self.observed_generation() == Some(self.generation())
            && self.last_operation().is_some_and(LastOperation::succeeded)
    }

    /// Whether the last operation was a successful migration
    pub fn is_migrated(&self) -> bool {
        self.last_operation()
            .is_some_and(|op| op.type_ == OperationType::Migrate && op.succeeded())
    }

    /// Observable lifecycle state
    pub fn lifecycle_state(&self) -> LifecycleState {
        if self.is_being_deleted() {
            return if self.has_finalizer() {
                LifecycleState::Deleting
            } else {
                LifecycleState::Deleted
            };
        }
        if self.is_migrated() {
            return LifecycleState::Migrated;
        }
        // Transient errors are retried, permanent ones wait for a spec change;
        // both read as Failed until an operation succeeds
        if self.last_operation().is_some_and(|op| {
            matches!(op.state, OperationState::Error | OperationState::Failed)
        }) {
            return LifecycleState::Failed;
        }
        if self.is_reconciled() {
            LifecycleState::Ready
        } else {
            LifecycleState::Pending
        }
    }
}
