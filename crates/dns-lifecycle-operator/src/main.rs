//! DNS lifecycle operator - runs the DNS service extension controller

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kube::Api;
use tokio_util::sync::CancellationToken;

use dns_lifecycle_common::crd::DnsExtension;
use dns_lifecycle_common::kube_utils::create_client;
use dns_lifecycle_controller::{Controller, MigrationMode};
use dns_lifecycle_operator::settings::{load_config, Overrides};
use dns_lifecycle_operator::startup::{crd_yaml, ensure_crd_installed, init_telemetry, LogFormat};

/// Lifecycle controller for the DNS service extension
#[derive(Parser, Debug)]
#[command(name = "dns-lifecycle", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Controller configuration file (YAML)
    #[arg(long, env = "DNS_LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig for the cluster holding the DnsExtension resources
    /// (in-cluster or default kubeconfig when unset)
    #[arg(long, env = "DNS_LIFECYCLE_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig for the cluster receiving the DNS component
    /// (same cluster as the resources when unset)
    #[arg(long, env = "DNS_LIFECYCLE_TARGET_KUBECONFIG")]
    target_kubeconfig: Option<PathBuf>,

    /// What Migrate does with live objects
    #[arg(long, env = "DNS_LIFECYCLE_MIGRATION_MODE")]
    migration_mode: Option<MigrationMode>,

    /// Number of concurrent workers
    #[arg(long, env = "DNS_LIFECYCLE_WORKERS")]
    workers: Option<usize>,

    /// Seconds between full resyncs
    #[arg(long, env = "DNS_LIFECYCLE_RESYNC_INTERVAL")]
    resync_interval: Option<u64>,

    /// Ignore the user-facing operation annotation
    #[arg(long, env = "DNS_LIFECYCLE_IGNORE_OPERATION_ANNOTATION")]
    ignore_operation_annotation: Option<bool>,

    /// Directory with template sets, replacing the built-in ones
    #[arg(long, env = "DNS_LIFECYCLE_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Extension type to handle
    #[arg(long, env = "DNS_LIFECYCLE_EXTENSION_TYPE")]
    extension_type: Option<String>,

    /// Log output format
    #[arg(long, env = "DNS_LIFECYCLE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            migration_mode: self.migration_mode,
            workers: self.workers,
            resync_interval_secs: self.resync_interval,
            ignore_operation_annotation: self.ignore_operation_annotation,
            template_dir: self.template_dir.clone(),
            extension_type: self.extension_type.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(cli.log_format);

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), &cli.overrides())
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    tracing::info!(
        migration_mode = %config.migration_mode,
        workers = config.workers,
        resync_interval_secs = config.resync_interval.as_secs(),
        "DNS lifecycle controller starting..."
    );

    let management = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let target = match cli.target_kubeconfig.as_deref() {
        Some(path) => create_client(Some(path))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create target cluster client: {}", e))?,
        None => management.clone(),
    };

    ensure_crd_installed(&management).await?;

    let extensions: Api<DnsExtension> = Api::all(management.clone());
    let controller = Controller::from_clients(config, management, target);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received, draining workers...");
                    cancel.cancel();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    });

    controller.run(extensions, cancel).await;
    tracing::info!("DNS lifecycle controller stopped");
    Ok(())
}
