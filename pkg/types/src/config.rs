use serde::{Deserialize, Serialize};

/// Where GPU quota lives in the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuQuotaMode {
    /// `requests.nvidia.com/gpu` inside the namespace's ResourceQuota.
    #[default]
    Unified,
    /// Dedicated GpuQuota objects, reconciled by a separate pass.
    Legacy,
}

/// Per-resource policy block of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePolicyFile {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, alias = "min-quota")]
    pub min_quota: Option<i64>,
    #[serde(default, alias = "max-quota")]
    pub max_quota: Option<i64>,
    #[serde(default, alias = "min-rate")]
    pub min_rate: Option<f64>,
    #[serde(default, alias = "max-rate")]
    pub max_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterApiFile {
    /// Path of a kubeconfig file. Inferred when absent.
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// API server address overriding the kubeconfig's.
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default, alias = "insecure-skip-tls-verify")]
    pub insecure_skip_tls_verify: Option<bool>,
}

/// SMTP account used for notification mail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpFile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookFile {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default, alias = "cert-file")]
    pub cert_file: Option<String>,
    #[serde(default, alias = "key-file")]
    pub key_file: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// cluster-name: prod-east
/// prometheus-url: http://prometheus.monitor:9090
/// directory-url: http://directory.internal/groups
/// mail-admins: [ops@example.com]
/// mail-from: quota-bot@example.com
/// smtp: { host: smtp.example.com, port: 465, username: quota-bot, password: secret }
/// cluster-api: { kubeconfig: /etc/throttle/kubeconfig }
/// sync-period-minutes: 10080
/// gpu-quota-mode: unified
/// whitelist-namespaces: [kube-system]
/// cpu: { min-quota: 60, min-rate: 30 }
/// memory: { enabled: false }
/// webhook:
///   enabled: true
///   cert-file: /etc/throttle/tls.crt
///   key-file: /etc/throttle/tls.key
///   threshold: 0.6
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfigFile {
    #[serde(default, alias = "cluster-name")]
    pub cluster_name: Option<String>,
    #[serde(default, alias = "prometheus-url")]
    pub prometheus_url: Option<String>,
    #[serde(default, alias = "directory-url")]
    pub directory_url: Option<String>,
    #[serde(default, alias = "dashboard-url")]
    pub dashboard_url: Option<String>,
    #[serde(default, alias = "mail-admins")]
    pub mail_admins: Option<Vec<String>>,
    #[serde(default)]
    pub smtp: SmtpFile,
    #[serde(default, alias = "mail-relay-url")]
    pub mail_relay_url: Option<String>,
    #[serde(default, alias = "mail-from")]
    pub mail_from: Option<String>,
    #[serde(default, alias = "sync-period-minutes")]
    pub sync_period_minutes: Option<i64>,
    #[serde(default, alias = "max-concurrent-namespaces")]
    pub max_concurrent_namespaces: Option<usize>,
    #[serde(default, alias = "gpu-quota-mode")]
    pub gpu_quota_mode: Option<GpuQuotaMode>,
    /// Namespaces the controller never touches.
    #[serde(default, alias = "whitelist-namespaces")]
    pub whitelist_namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub cpu: ResourcePolicyFile,
    #[serde(default)]
    pub memory: ResourcePolicyFile,
    #[serde(default)]
    pub gpu: ResourcePolicyFile,
    #[serde(default, alias = "cluster-api")]
    pub cluster_api: ClusterApiFile,
    #[serde(default)]
    pub webhook: WebhookFile,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
