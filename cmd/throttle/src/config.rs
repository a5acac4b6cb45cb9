use anyhow::{Context, bail};
use pkg_admission::{GateConfig, WebhookConfig};
use pkg_cluster::ApiClusterConfig;
use pkg_constants::admission::DEFAULT_SCORE_THRESHOLD;
use pkg_constants::network::{DEFAULT_PROMETHEUS_URL, DEFAULT_SMTP_PORT, DEFAULT_WEBHOOK_LISTEN};
use pkg_constants::quota::{DEFAULT_MAX_CONCURRENT_NAMESPACES, DEFAULT_SYNC_PERIOD_MINUTES};
use pkg_controllers::ControllerConfig;
use pkg_notify::{MessageContext, SmtpConfig};
use pkg_quota::{Bounds, ResourcePolicy};
use pkg_types::config::{ResourcePolicyFile, ThrottleConfigFile};
use pkg_types::quota::ResourceKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use crate::Cli;

/// Fully resolved runtime settings: CLI flags over config file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub controller: ControllerConfig,
    pub prometheus_url: String,
    pub directory_url: String,
    /// `None` when no SMTP host is configured.
    pub smtp: Option<SmtpConfig>,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub cluster_api: ApiClusterConfig,
    pub gate: GateConfig,
    /// `None` when the webhook is disabled.
    pub webhook: Option<WebhookConfig>,
}

fn resolve_policy(
    kind: ResourceKind,
    file: &ResourcePolicyFile,
    flags: &ResourcePolicyFile,
) -> anyhow::Result<ResourcePolicy> {
    let defaults = ResourcePolicy::default_for(kind);
    let policy = ResourcePolicy {
        enabled: flags.enabled.or(file.enabled).unwrap_or(defaults.enabled),
        bounds: Bounds {
            min_rate: flags.min_rate.or(file.min_rate).unwrap_or(defaults.bounds.min_rate),
            max_rate: flags.max_rate.or(file.max_rate).unwrap_or(defaults.bounds.max_rate),
            min_quota: flags.min_quota.or(file.min_quota).unwrap_or(defaults.bounds.min_quota),
            max_quota: flags.max_quota.or(file.max_quota).unwrap_or(defaults.bounds.max_quota),
        },
    };

    let b = &policy.bounds;
    if !(0.0..=100.0).contains(&b.min_rate) || !(0.0..=100.0).contains(&b.max_rate) {
        bail!("{}: rates must be percentages between 0 and 100", kind);
    }
    if b.min_rate > b.max_rate {
        bail!("{}: min-rate {} exceeds max-rate {}", kind, b.min_rate, b.max_rate);
    }
    if b.min_quota < 0 || b.min_quota > b.max_quota {
        bail!(
            "{}: min-quota {} must be between 0 and max-quota {}",
            kind,
            b.min_quota,
            b.max_quota
        );
    }
    Ok(policy)
}

fn check_url(name: &str, url: &str) -> anyhow::Result<()> {
    reqwest::Url::parse(url).with_context(|| format!("invalid {} '{}'", name, url))?;
    Ok(())
}

impl Settings {
    pub fn merge(cli: &Cli, file: ThrottleConfigFile) -> anyhow::Result<Self> {
        let cpu = resolve_policy(ResourceKind::Cpu, &file.cpu, &cli.policy_flags(ResourceKind::Cpu))?;
        let memory = resolve_policy(
            ResourceKind::Memory,
            &file.memory,
            &cli.policy_flags(ResourceKind::Memory),
        )?;
        let gpu = resolve_policy(ResourceKind::Gpu, &file.gpu, &cli.policy_flags(ResourceKind::Gpu))?;

        let directory_url = cli
            .directory_url
            .clone()
            .or(file.directory_url)
            .context("directory-url is required to resolve namespace owners")?;

        let mut mail_admins = file.mail_admins.unwrap_or_default();
        mail_admins.extend(cli.mail_admins.iter().cloned());

        let controller = ControllerConfig {
            sync_period: ControllerConfig::sync_period_from_minutes(
                cli.sync_period_minutes
                    .or(file.sync_period_minutes)
                    .unwrap_or(DEFAULT_SYNC_PERIOD_MINUTES),
            ),
            max_concurrent_namespaces: file
                .max_concurrent_namespaces
                .unwrap_or(DEFAULT_MAX_CONCURRENT_NAMESPACES),
            gpu_quota_mode: cli.gpu_quota_mode.or(file.gpu_quota_mode).unwrap_or_default(),
            whitelist_namespaces: file.whitelist_namespaces.unwrap_or_default().into_iter().collect(),
            mail_admins,
            message: MessageContext {
                cluster_name: cli
                    .cluster_name
                    .clone()
                    .or(file.cluster_name)
                    .unwrap_or_else(|| "default".to_string()),
                dashboard_url: file.dashboard_url.unwrap_or_default(),
                cpu_min_rate: cpu.bounds.min_rate,
                memory_min_rate: memory.bounds.min_rate,
                gpu_min_rate: gpu.bounds.min_rate,
            },
            cpu,
            memory,
            gpu,
        };

        let threshold = cli
            .threshold
            .or(file.webhook.threshold)
            .unwrap_or(DEFAULT_SCORE_THRESHOLD);
        if !threshold.is_finite() {
            bail!("webhook threshold must be a finite number");
        }

        let webhook = if cli.enable_webhook || file.webhook.enabled.unwrap_or(false) {
            let listen = file
                .webhook
                .listen
                .unwrap_or_else(|| DEFAULT_WEBHOOK_LISTEN.to_string());
            let listen: SocketAddr = listen
                .parse()
                .with_context(|| format!("invalid webhook listen address {}", listen))?;
            let cert_file = cli
                .tls_cert_file
                .clone()
                .or(file.webhook.cert_file.map(PathBuf::from))
                .context("webhook enabled but no TLS certificate configured")?;
            let key_file = cli
                .tls_private_key_file
                .clone()
                .or(file.webhook.key_file.map(PathBuf::from))
                .context("webhook enabled but no TLS private key configured")?;
            Some(WebhookConfig {
                listen,
                cert_file,
                key_file,
            })
        } else {
            None
        };

        let prometheus_url = cli
            .prometheus_url
            .clone()
            .or(file.prometheus_url)
            .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string());
        check_url("prometheus-url", &prometheus_url)?;
        check_url("directory-url", &directory_url)?;
        if let Some(relay) = &file.mail_relay_url {
            check_url("mail-relay-url", relay)?;
        }
        let master = cli.master.clone().or(file.cluster_api.master);
        if let Some(master) = &master {
            check_url("master", master)?;
        }
        let mail_from = file
            .mail_from
            .unwrap_or_else(|| "throttle@localhost".to_string());
        let smtp = cli
            .smtp_host
            .clone()
            .or(file.smtp.host)
            .map(|host| SmtpConfig {
                host,
                port: cli.smtp_port.or(file.smtp.port).unwrap_or(DEFAULT_SMTP_PORT),
                username: cli.smtp_user.clone().or(file.smtp.username),
                password: cli.smtp_password.clone().or(file.smtp.password),
                from: mail_from.clone(),
            });

        Ok(Self {
            controller,
            prometheus_url,
            directory_url,
            smtp,
            mail_relay_url: file.mail_relay_url,
            mail_from,
            cluster_api: ApiClusterConfig {
                kubeconfig: cli
                    .kubeconfig
                    .clone()
                    .or(file.cluster_api.kubeconfig.map(PathBuf::from)),
                master,
                insecure_skip_tls_verify: file.cluster_api.insecure_skip_tls_verify.unwrap_or(false),
            },
            gate: GateConfig { threshold },
            webhook,
        })
    }

    pub fn log_summary(&self) {
        let c = &self.controller;
        info!("  Cluster:     {}", c.message.cluster_name);
        match (&self.cluster_api.kubeconfig, &self.cluster_api.master) {
            (Some(path), _) => info!("  Kubeconfig:  {}", path.display()),
            (None, Some(master)) => info!("  Master:      {}", master),
            (None, None) => info!("  Kubeconfig:  inferred"),
        }
        info!("  Prometheus:  {}", self.prometheus_url);
        info!("  Directory:   {}", self.directory_url);
        match (&self.smtp, &self.mail_relay_url) {
            (Some(smtp), _) => info!("  Mail:        smtp {}:{}", smtp.host, smtp.port),
            (None, Some(relay)) => info!("  Mail:        relay {}", relay),
            (None, None) => info!("  Mail:        log only"),
        }
        info!("  Sync period: {}m", c.sync_period.as_secs() / 60);
        info!("  GPU quota:   {:?}", c.gpu_quota_mode);
        for kind in ResourceKind::ALL {
            let p = c.policy(kind);
            info!(
                "  {:<6} enabled={} min-rate={} min-quota={}",
                kind, p.enabled, p.bounds.min_rate, p.bounds.min_quota
            );
        }
        match &self.webhook {
            Some(w) => info!("  Webhook:     {} (threshold={})", w.listen, self.gate.threshold),
            None => info!("  Webhook:     disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pkg_types::config::GpuQuotaMode;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["throttle"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    fn file(yaml: &str) -> ThrottleConfigFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_fill_gaps() {
        let settings = Settings::merge(
            &cli(&[]),
            file("directory-url: http://dir.internal/groups"),
        )
        .unwrap();
        let c = &settings.controller;
        assert_eq!(c.sync_period, Duration::from_secs(10080 * 60));
        assert_eq!(c.cpu.bounds.min_quota, 60);
        assert_eq!(c.memory.bounds.min_rate, 40.0);
        assert_eq!(c.gpu.bounds.min_rate, 10.0);
        assert_eq!(c.gpu_quota_mode, GpuQuotaMode::Unified);
        assert_eq!(settings.prometheus_url, "http://127.0.0.1:9090");
        assert!(settings.webhook.is_none());
        assert_eq!(settings.gate.threshold, 0.6);
    }

    #[test]
    fn cli_overrides_file() {
        let settings = Settings::merge(
            &cli(&[
                "--cluster-name",
                "from-cli",
                "--sync-period-minutes",
                "0",
                "--enable-memory",
                "false",
                "--mail-admins",
                "c@example.com",
            ]),
            file(
                r#"
cluster-name: from-file
directory-url: http://dir.internal/groups
sync-period-minutes: 30
mail-admins: [a@example.com]
memory: { enabled: true, min-rate: 20 }
"#,
            ),
        )
        .unwrap();
        let c = &settings.controller;
        assert_eq!(c.message.cluster_name, "from-cli");
        // Non-positive period falls back to a week.
        assert_eq!(c.sync_period, Duration::from_secs(10080 * 60));
        assert!(!c.memory.enabled);
        assert_eq!(c.memory.bounds.min_rate, 20.0);
        assert_eq!(c.message.memory_min_rate, 20.0);
        assert_eq!(c.mail_admins, vec!["a@example.com", "c@example.com"]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = Settings::merge(
            &cli(&[]),
            file("directory-url: http://dir\ncpu: { min-rate: 90, max-rate: 80 }"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cpu"), "{}", err);
    }

    #[test]
    fn webhook_needs_tls_material() {
        let yaml = "directory-url: http://dir\nwebhook: { enabled: true }";
        assert!(Settings::merge(&cli(&[]), file(yaml)).is_err());

        let settings = Settings::merge(
            &cli(&[
                "--tls-cert-file",
                "/tls/tls.crt",
                "--tls-private-key-file",
                "/tls/tls.key",
            ]),
            file(yaml),
        )
        .unwrap();
        let webhook = settings.webhook.unwrap();
        assert_eq!(webhook.listen.port(), 443);
        assert_eq!(webhook.cert_file, PathBuf::from("/tls/tls.crt"));
    }

    #[test]
    fn bound_flags_override_file() {
        let settings = Settings::merge(
            &cli(&[
                "--min-cpu",
                "10",
                "--max-cpu-rate",
                "90",
                "--min-mem",
                "50",
                "--max-gpu",
                "8",
                "--min-gpu-rate",
                "5",
            ]),
            file("directory-url: http://dir\ncpu: { min-quota: 20, min-rate: 25 }"),
        )
        .unwrap();
        let c = &settings.controller;
        assert_eq!(c.cpu.bounds.min_quota, 10);
        assert_eq!(c.cpu.bounds.min_rate, 25.0);
        assert_eq!(c.cpu.bounds.max_rate, 90.0);
        assert_eq!(c.memory.bounds.min_quota, 50);
        assert_eq!(c.memory.bounds.max_quota, 10000);
        assert_eq!(c.gpu.bounds.max_quota, 8);
        assert_eq!(c.gpu.bounds.min_rate, 5.0);
        assert_eq!(c.message.gpu_min_rate, 5.0);

        let err = Settings::merge(
            &cli(&["--min-mem-rate", "90"]),
            file("directory-url: http://dir"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("memory"), "{}", err);
    }

    #[test]
    fn smtp_and_cluster_access_are_merged() {
        let yaml = r#"
directory-url: http://dir
mail-from: quota-bot@example.com
smtp: { host: smtp.example.com, username: bot, password: from-file }
cluster-api: { kubeconfig: /etc/throttle/kubeconfig, insecure-skip-tls-verify: true }
"#;
        let settings = Settings::merge(
            &cli(&["--smtp-port", "465", "--master", "https://10.0.0.1:6443"]),
            file(yaml),
        )
        .unwrap();
        let smtp = settings.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 465);
        assert_eq!(smtp.username.as_deref(), Some("bot"));
        assert_eq!(smtp.password.as_deref(), Some("from-file"));
        assert_eq!(smtp.from, "quota-bot@example.com");
        let api = &settings.cluster_api;
        assert_eq!(api.kubeconfig, Some(PathBuf::from("/etc/throttle/kubeconfig")));
        assert_eq!(api.master.as_deref(), Some("https://10.0.0.1:6443"));
        assert!(api.insecure_skip_tls_verify);

        let plain = Settings::merge(&cli(&[]), file("directory-url: http://dir")).unwrap();
        assert!(plain.smtp.is_none());
        assert!(plain.cluster_api.kubeconfig.is_none());
        assert!(plain.cluster_api.master.is_none());
    }

    #[test]
    fn directory_is_required() {
        assert!(Settings::merge(&cli(&[]), ThrottleConfigFile::default()).is_err());
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let err = Settings::merge(
            &cli(&["--prometheus-url", "not a url"]),
            file("directory-url: http://dir"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("prometheus-url"), "{}", err);
    }
}
