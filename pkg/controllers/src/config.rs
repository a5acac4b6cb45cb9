use pkg_constants::quota::{DEFAULT_MAX_CONCURRENT_NAMESPACES, DEFAULT_SYNC_PERIOD_MINUTES};
use pkg_notify::MessageContext;
use pkg_quota::ResourcePolicy;
use pkg_types::config::GpuQuotaMode;
use pkg_types::quota::ResourceKind;
use std::collections::BTreeSet;
use std::time::Duration;

/// Settings the quota controller reads on every tick. Built once at startup
/// and shared read-only between namespace tasks.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub sync_period: Duration,
    pub max_concurrent_namespaces: usize,
    pub gpu_quota_mode: GpuQuotaMode,
    pub cpu: ResourcePolicy,
    pub memory: ResourcePolicy,
    pub gpu: ResourcePolicy,
    /// Namespaces skipped entirely.
    pub whitelist_namespaces: BTreeSet<String>,
    /// Always notified, in addition to namespace owners.
    pub mail_admins: Vec<String>,
    pub message: MessageContext,
}

impl ControllerConfig {
    /// Sync period from a configured number of minutes. Non-positive values
    /// fall back to one week.
    pub fn sync_period_from_minutes(minutes: i64) -> Duration {
        let minutes = if minutes <= 0 {
            DEFAULT_SYNC_PERIOD_MINUTES
        } else {
            minutes
        };
        Duration::from_secs(minutes as u64 * 60)
    }

    pub fn policy(&self, kind: ResourceKind) -> &ResourcePolicy {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Gpu => &self.gpu,
        }
    }

    /// Namespace tasks allowed in flight at once; never zero.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_namespaces.max(1)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let cpu = ResourcePolicy::default_for(ResourceKind::Cpu);
        let memory = ResourcePolicy::default_for(ResourceKind::Memory);
        let gpu = ResourcePolicy::default_for(ResourceKind::Gpu);
        Self {
            sync_period: Self::sync_period_from_minutes(DEFAULT_SYNC_PERIOD_MINUTES),
            max_concurrent_namespaces: DEFAULT_MAX_CONCURRENT_NAMESPACES,
            gpu_quota_mode: GpuQuotaMode::default(),
            whitelist_namespaces: BTreeSet::new(),
            mail_admins: Vec::new(),
            message: MessageContext {
                cluster_name: "default".to_string(),
                dashboard_url: String::new(),
                cpu_min_rate: cpu.bounds.min_rate,
                memory_min_rate: memory.bounds.min_rate,
                gpu_min_rate: gpu.bounds.min_rate,
            },
            cpu,
            memory,
            gpu,
        }
    }
}
