mod config;

use clap::Parser;
use pkg_admission::{AdmissionGate, WebhookState, start_webhook};
use pkg_cluster::{ApiClusterClient, ClusterClient};
use pkg_controllers::{QuotaController, TickOutcome};
use pkg_metrics::{MetricsRegistry, PrometheusGateway};
use pkg_notify::{HttpDirectory, LogNotifier, Notifier, RelayNotifier, SmtpNotifier};
use pkg_types::config::{GpuQuotaMode, ResourcePolicyFile, ThrottleConfigFile, load_config_file};
use pkg_types::quota::ResourceKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "throttle",
    version,
    about = "Namespace quota right-sizing controller and pod admission webhook"
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "/etc/throttle/config.yaml")]
    config: String,

    /// Cluster name quoted in notifications
    #[arg(long)]
    cluster_name: Option<String>,

    /// Kubeconfig file; inferred from the environment when absent
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Cluster API server address, overriding the kubeconfig's
    #[arg(long)]
    master: Option<String>,

    /// Prometheus-compatible query endpoint
    #[arg(long)]
    prometheus_url: Option<String>,

    /// Directory service resolving namespace owners
    #[arg(long)]
    directory_url: Option<String>,

    /// Extra administrators notified of every change (repeatable)
    #[arg(long)]
    mail_admins: Vec<String>,

    /// Minutes between reconciliations; non-positive means one week
    #[arg(long, allow_negative_numbers = true)]
    sync_period_minutes: Option<i64>,

    /// Where GPU quota lives: unified or legacy
    #[arg(long, value_parser = parse_gpu_quota_mode)]
    gpu_quota_mode: Option<GpuQuotaMode>,

    #[arg(long)]
    enable_cpu: Option<bool>,

    #[arg(long)]
    enable_memory: Option<bool>,

    #[arg(long)]
    enable_gpu: Option<bool>,

    #[arg(long)]
    min_cpu: Option<i64>,
    #[arg(long)]
    max_cpu: Option<i64>,
    #[arg(long)]
    min_cpu_rate: Option<f64>,
    #[arg(long)]
    max_cpu_rate: Option<f64>,

    /// Memory floor in GiB
    #[arg(long)]
    min_mem: Option<i64>,
    #[arg(long)]
    max_mem: Option<i64>,
    #[arg(long)]
    min_mem_rate: Option<f64>,
    #[arg(long)]
    max_mem_rate: Option<f64>,

    #[arg(long)]
    min_gpu: Option<i64>,
    #[arg(long)]
    max_gpu: Option<i64>,
    #[arg(long)]
    min_gpu_rate: Option<f64>,
    #[arg(long)]
    max_gpu_rate: Option<f64>,

    /// SMTP server for notification mail
    #[arg(long)]
    smtp_host: Option<String>,

    #[arg(long)]
    smtp_port: Option<u16>,

    #[arg(long)]
    smtp_user: Option<String>,

    #[arg(long)]
    smtp_password: Option<String>,

    /// Serve the pod admission webhook
    #[arg(long)]
    enable_webhook: bool,

    /// Admission score threshold
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    tls_cert_file: Option<PathBuf>,

    #[arg(long)]
    tls_private_key_file: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,

    /// Reconcile once and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Policy values given on the command line for one resource kind.
    fn policy_flags(&self, kind: ResourceKind) -> ResourcePolicyFile {
        let (enabled, min_quota, max_quota, min_rate, max_rate) = match kind {
            ResourceKind::Cpu => (
                self.enable_cpu,
                self.min_cpu,
                self.max_cpu,
                self.min_cpu_rate,
                self.max_cpu_rate,
            ),
            ResourceKind::Memory => (
                self.enable_memory,
                self.min_mem,
                self.max_mem,
                self.min_mem_rate,
                self.max_mem_rate,
            ),
            ResourceKind::Gpu => (
                self.enable_gpu,
                self.min_gpu,
                self.max_gpu,
                self.min_gpu_rate,
                self.max_gpu_rate,
            ),
        };
        ResourcePolicyFile {
            enabled,
            min_quota,
            max_quota,
            min_rate,
            max_rate,
        }
    }
}

fn parse_gpu_quota_mode(s: &str) -> Result<GpuQuotaMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "unified" => Ok(GpuQuotaMode::Unified),
        "legacy" => Ok(GpuQuotaMode::Legacy),
        other => Err(format!("unknown GPU quota mode '{}'", other)),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    // kube and reqwest may both link a rustls backend; pin one process-wide.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Load config file (returns defaults if file not found)
    let file_cfg: ThrottleConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let settings = Settings::merge(&cli, file_cfg)?;

    info!("Starting throttle");
    settings.log_summary();

    let http = reqwest::Client::new();
    let metrics = Arc::new(MetricsRegistry::with_defaults());
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(ApiClusterClient::connect(&settings.cluster_api).await?);
    let usage = Arc::new(PrometheusGateway::new(&settings.prometheus_url, http.clone()));
    let directory = Arc::new(HttpDirectory::new(&settings.directory_url, http.clone()));
    let notifier: Arc<dyn Notifier> = match (&settings.smtp, &settings.mail_relay_url) {
        (Some(smtp), _) => Arc::new(SmtpNotifier::new(smtp)?),
        (None, Some(relay)) => {
            Arc::new(RelayNotifier::new(relay, &settings.mail_from, http.clone()))
        }
        (None, None) => {
            warn!("No SMTP server or mail relay configured, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // TLS problems abort startup here rather than inside the serving task.
    let webhook = match &settings.webhook {
        Some(webhook_cfg) => {
            let gate = AdmissionGate::new(cluster.clone(), settings.gate, metrics.clone());
            let state = WebhookState {
                gate: Arc::new(gate),
                metrics: metrics.clone(),
            };
            Some(start_webhook(webhook_cfg.clone(), state, shutdown_rx.clone()).await?)
        }
        None => None,
    };

    let controller = QuotaController::new(
        settings.controller.clone(),
        cluster,
        usage,
        directory,
        notifier,
        metrics,
    );

    if cli.once {
        match controller.reconcile().await? {
            TickOutcome::Completed { namespaces } => {
                info!("Reconciled {} namespaces", namespaces)
            }
            TickOutcome::Skipped => warn!("Reconciliation skipped"),
        }
        let _ = shutdown_tx.send(true);
        if let Some(handle) = webhook {
            handle.await??;
        }
        return Ok(());
    }

    let controller_handle = controller.start();

    match webhook {
        Some(mut handle) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
                res = &mut handle => {
                    controller_handle.abort();
                    return match res? {
                        Ok(()) => Ok(()),
                        Err(e) => Err(e.context("admission webhook stopped")),
                    };
                }
            }
            let _ = shutdown_tx.send(true);
            controller_handle.abort();
            handle.await??;
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
            controller_handle.abort();
        }
    }

    info!("throttle stopped");
    Ok(())
}
