//! Startup utilities: logging and CRD installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dns_lifecycle_common::crd::DnsExtension;
use dns_lifecycle_common::retry::{retry_with_backoff, RetryConfig};
use dns_lifecycle_common::DEFAULT_FIELD_MANAGER;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,dns_lifecycle=debug,kube=info";

/// Attempts made to install the CRD before giving up
const CRD_INSTALL_ATTEMPTS: u32 = 5;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Install the global tracing subscriber
pub fn init_telemetry(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// The `DnsExtension` CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&DnsExtension::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}

/// Install or update the `DnsExtension` CRD with server-side apply
///
/// The operator installs its own CRD so the schema always matches the binary.
pub async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(DEFAULT_FIELD_MANAGER).force();
    let crd = DnsExtension::crd();
    let name = DnsExtension::crd_name();

    tracing::info!(crd = %name, "Installing CRD...");
    let (crds, params, crd) = (&crds, &params, &crd);
    retry_with_backoff(
        &RetryConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS),
        "install_crd",
        || async move { crds.patch(name, params, &Patch::Apply(crd)).await },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;

    tracing::info!(crd = %name, "CRD installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_yaml_describes_the_resource() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("dnsextensions.dns.extensions.dev"));
        assert!(yaml.contains("x-kubernetes-preserve-unknown-fields"));
        assert!(yaml.contains("subresources"));
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
