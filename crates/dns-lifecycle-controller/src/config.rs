//! Controller configuration
//!
//! Built once at startup (file + CLI overrides) and passed by value into
//! [`crate::Controller::new`]. Nothing reads configuration from globals.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dns_lifecycle_common::retry::RetryConfig;
use dns_lifecycle_common::{Error, DEFAULT_EXTENSION_TYPE, DEFAULT_FIELD_MANAGER};

use crate::filter::FilterConfig;

/// Default period between full resyncs
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default number of concurrent workers
pub const DEFAULT_WORKERS: usize = 5;
/// Namespace in the target cluster holding the component and its inventory
pub const DEFAULT_TARGET_NAMESPACE: &str = "kube-system";

/// What a Migrate does with the objects already in the target cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    /// Leave objects running; another instance adopts them on restore
    KeepManagedObjects,
    /// Tear down the component before releasing the finalizer
    RemoveManagedObjects,
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepManagedObjects => write!(f, "keep-managed-objects"),
            Self::RemoveManagedObjects => write!(f, "remove-managed-objects"),
        }
    }
}

impl std::str::FromStr for MigrationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-managed-objects" => Ok(Self::KeepManagedObjects),
            "remove-managed-objects" => Ok(Self::RemoveManagedObjects),
            other => Err(Error::permanent_config(format!(
                "invalid migration mode '{}': expected keep-managed-objects or remove-managed-objects",
                other
            ))),
        }
    }
}

/// Controller settings
///
/// `migration_mode` has no default: deployments must pick one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Period between full re-enqueues of every cached extension
    #[serde(
        rename = "resyncIntervalSeconds",
        with = "duration_secs",
        default = "default_resync_interval"
    )]
    pub resync_interval: Duration,

    /// Ignore the user-facing operation annotation entirely
    #[serde(default)]
    pub ignore_operation_annotation: bool,

    /// Behavior of Migrate towards live objects
    pub migration_mode: MigrationMode,

    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Only extensions with this `spec.type` are handled
    #[serde(default = "default_extension_type")]
    pub extension_type: String,

    /// Template set rendered for each extension
    #[serde(default = "default_extension_type")]
    pub template_set: String,

    /// Directory holding `<set>/*.yaml`; the embedded set is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,

    /// Namespace in the target cluster where inventories are stored
    #[serde(default = "default_target_namespace")]
    pub inventory_namespace: String,

    /// Namespace for namespaced manifests that don't set one
    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,

    /// Static values merged under every extension's values
    #[serde(default = "empty_object")]
    pub values: Value,

    /// Per-extension retry backoff
    #[serde(default)]
    pub backoff: RetryConfig,

    /// Field manager for server-side apply in the target cluster
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

fn default_resync_interval() -> Duration {
    DEFAULT_RESYNC_INTERVAL
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_extension_type() -> String {
    DEFAULT_EXTENSION_TYPE.to_string()
}

fn default_target_namespace() -> String {
    DEFAULT_TARGET_NAMESPACE.to_string()
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ControllerConfig {
    /// Config with every optional setting at its default
    pub fn new(migration_mode: MigrationMode) -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            ignore_operation_annotation: false,
            migration_mode,
            workers: DEFAULT_WORKERS,
            extension_type: default_extension_type(),
            template_set: default_extension_type(),
            template_dir: None,
            inventory_namespace: default_target_namespace(),
            target_namespace: default_target_namespace(),
            values: empty_object(),
            backoff: RetryConfig::default(),
            field_manager: default_field_manager(),
        }
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::permanent_config("workers must be at least 1"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::permanent_config("resync interval must be positive"));
        }
        if !self.values.is_object() {
            return Err(Error::permanent_config("values must be a mapping"));
        }
        if self.backoff.initial_delay.is_zero()
            || self.backoff.initial_delay > self.backoff.max_delay
        {
            return Err(Error::permanent_config(
                "backoff initial delay must be positive and not exceed the max delay",
            ));
        }
        if self.extension_type.is_empty() || self.template_set.is_empty() {
            return Err(Error::permanent_config(
                "extension type and template set must not be empty",
            ));
        }
        Ok(())
    }

    /// Settings consumed by the event filter
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            extension_type: self.extension_type.clone(),
            ignore_operation_annotation: self.ignore_operation_annotation,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
