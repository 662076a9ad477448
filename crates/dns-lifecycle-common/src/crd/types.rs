//! Status building blocks shared by the `DnsExtension` resource

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of the last operation executed for an extension
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// First successful install
    Create,
    /// Install or update of an existing component
    Reconcile,
    /// Teardown ahead of resource deletion
    Delete,
    /// Handover to another controller instance
    Migrate,
    /// Re-install after a migration
    Restore,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Reconcile => write!(f, "Reconcile"),
            Self::Delete => write!(f, "Delete"),
            Self::Migrate => write!(f, "Migrate"),
            Self::Restore => write!(f, "Restore"),
        }
    }
}

/// Outcome of the last operation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OperationState {
    /// Operation completed
    Succeeded,
    /// Operation failed transiently and will be retried
    Error,
    /// Operation failed permanently; waits for a spec change
    Failed,
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Error => write!(f, "Error"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Record of the most recent operation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// Operation kind
    #[serde(rename = "type")]
    pub type_: OperationType,
    /// Operation outcome
    pub state: OperationState,
    /// Human-readable summary
    pub description: String,
    /// When this record was written
    pub last_update_time: DateTime<Utc>,
    /// Completion percentage (0-100)
    pub progress: i32,
}

impl LastOperation {
    /// Create a record stamped with the current time
    pub fn new(
        type_: OperationType,
        state: OperationState,
        description: impl Into<String>,
    ) -> Self {
        let progress = match state {
            OperationState::Succeeded => 100,
            _ => 0,
        };
        Self {
            type_,
            state,
            description: description.into(),
            last_update_time: Utc::now(),
            progress,
        }
    }

    /// Whether the operation completed
    pub fn succeeded(&self) -> bool {
        self.state == OperationState::Succeeded
    }
}

/// Machine-readable classification of the last error
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ErrorCode {
    /// The resource's configuration is invalid
    #[serde(rename = "ERR_CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
    /// A dependency failed in a way that is expected to heal
    #[serde(rename = "ERR_RETRYABLE_INFRA_DEPENDENCIES")]
    RetryableInfraDependencies,
    /// A dependency failed in a way that will not heal by itself
    #[serde(rename = "ERR_INFRA_DEPENDENCIES")]
    InfraDependencies,
    /// The controller lacks permissions in the target cluster
    #[serde(rename = "ERR_INFRA_INSUFFICIENT_PRIVILEGES")]
    InsufficientPrivileges,
    /// Managed objects are still present in the target cluster
    #[serde(rename = "ERR_CLEANUP_CLUSTER_RESOURCES")]
    CleanupClusterResources,
}

/// Details of the last failed operation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    /// Error message
    pub description: String,
    /// Error classification
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<ErrorCode>,
    /// When the error was recorded
    pub last_update_time: DateTime<Utc>,
}

impl LastError {
    /// Create an error record stamped with the current time
    pub fn new(description: impl Into<String>, codes: Vec<ErrorCode>) -> Self {
        Self {
            description: description.into(),
            codes,
            last_update_time: Utc::now(),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or replace a condition by type
///
/// The transition time is carried over when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Observable lifecycle state, derived from resource fields only
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not yet reconciled for the current generation
    Pending,
    /// Component installed for the current generation
    Ready,
    /// Deletion requested; teardown in progress
    Deleting,
    /// Finalizer released; the resource is about to disappear
    Deleted,
    /// Last operation failed; retried automatically unless the failure
    /// was permanent (`lastOperation.state` tells which)
    Failed,
    /// Handed over to another instance; waits for a restore
    Migrated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Failed => write!(f, "Failed"),
            Self::Migrated => write!(f, "Migrated"),
        }
    }
}
