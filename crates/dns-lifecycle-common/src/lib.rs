//! Common types for the DNS extension lifecycle controller
//!
//! Holds the `DnsExtension` CRD, the error taxonomy shared by every crate,
//! retry/backoff utilities, the manifest template engine and the helpers
//! used to turn rendered YAML into applyable Kubernetes objects.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod template;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the `DnsExtension` resource and all controller-owned keys
pub const API_GROUP: &str = "dns.extensions.dev";

/// Extension type handled by this controller unless configured otherwise
pub const DEFAULT_EXTENSION_TYPE: &str = "shoot-dns-service";

/// Finalizer guarding a `DnsExtension` while its component may exist
pub const FINALIZER: &str = "dns.extensions.dev/shoot-dns-service";

/// User-facing operation annotation (`reconcile`, `restore`, `migrate`)
pub const OPERATION_ANNOTATION: &str = "dns.extensions.dev/operation";

/// System-owned annotation marking a planned migration or restore
///
/// Honored even when the user-facing operation annotation is ignored.
pub const PLANNED_OPERATION_ANNOTATION: &str = "dns.extensions.dev/planned-operation";

/// Label key for resources managed by this controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by this controller
pub const LABEL_MANAGED_BY_VALUE: &str = "dns-lifecycle";

/// Label carrying the namespace of the owning `DnsExtension`
pub const LABEL_OWNER_NAMESPACE: &str = "dns.extensions.dev/owner-namespace";

/// Label carrying the name of the owning `DnsExtension`
pub const LABEL_OWNER_NAME: &str = "dns.extensions.dev/owner-name";

/// Default field manager for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "dns-lifecycle-controller";
