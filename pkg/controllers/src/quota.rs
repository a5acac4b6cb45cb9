use pkg_cluster::ClusterClient;
use pkg_constants::quota::WHITELIST_LABEL;
use pkg_metrics::registry::{
    NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_SENT_TOTAL, QUOTA_ADJUSTMENTS_TOTAL,
    QUOTA_UPDATE_FAILURES_TOTAL, RECONCILE_RUNS_TOTAL, USAGE_QUERY_FAILURES_TOTAL,
};
use pkg_metrics::{MetricsRegistry, UsageSource, UsageWindow};
use pkg_notify::{Notifier, OwnerDirectory, recipient_set, render};
use pkg_quota::{AdjustableQuota, GpuQuotaTarget, ScalingDecision, adjust_quota};
use pkg_types::config::GpuQuotaMode;
use pkg_types::quota::{GpuQuota, ResourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;

/// Result of one call to [`QuotaController::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { namespaces: usize },
    /// Another reconciliation was still running.
    Skipped,
}

/// Everything a namespace task needs, shared by all of them.
struct Shared {
    config: ControllerConfig,
    cluster: Arc<dyn ClusterClient>,
    usage: Arc<dyn UsageSource>,
    directory: Arc<dyn OwnerDirectory>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
}

/// Quota right-sizing controller.
/// Periodically shrinks the quota of namespaces that leave it unused.
pub struct QuotaController {
    shared: Arc<Shared>,
    in_flight: Mutex<()>,
}

impl QuotaController {
    pub fn new(
        config: ControllerConfig,
        cluster: Arc<dyn ClusterClient>,
        usage: Arc<dyn UsageSource>,
        directory: Arc<dyn OwnerDirectory>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                cluster,
                usage,
                directory,
                notifier,
                metrics,
            }),
            in_flight: Mutex::new(()),
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.shared.config.sync_period;
            info!(
                "QuotaController started (interval={}s, concurrency={})",
                period.as_secs(),
                self.shared.config.concurrency()
            );
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.reconcile().await {
                    warn!("QuotaController reconcile error: {}", e);
                }
            }
        })
    }

    /// Run one pass over every namespace. Returns once all namespace tasks
    /// have finished.
    pub async fn reconcile(&self) -> anyhow::Result<TickOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("QuotaController: previous reconciliation still running, skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        let namespaces = self.shared.cluster.list_namespaces().await?;
        let window = UsageWindow::last_week(chrono::Local::now());
        let semaphore = Arc::new(Semaphore::new(self.shared.config.concurrency()));
        let mut tasks = JoinSet::new();
        let mut count = 0;

        for ns in namespaces {
            let name = ns.name().to_string();
            if name.is_empty() {
                continue;
            }
            if self.shared.config.whitelist_namespaces.contains(&name) {
                debug!(namespace = %name, "namespace is whitelisted, skipping");
                continue;
            }
            count += 1;
            let permit = semaphore.clone().acquire_owned().await?;
            let shared = self.shared.clone();
            tasks.spawn(async move {
                let _permit = permit;
                shared.reconcile_namespace(&name, &window).await;
            });
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("QuotaController namespace task failed: {}", e);
            }
        }

        self.shared.metrics.counter_inc(RECONCILE_RUNS_TOTAL);
        info!("QuotaController reconciled {} namespaces", count);
        Ok(TickOutcome::Completed { namespaces: count })
    }
}

/// Per-namespace memo of usage averages; `None` records a failed query.
type UsageCache = HashMap<ResourceKind, Option<f64>>;

impl Shared {
    async fn reconcile_namespace(&self, namespace: &str, window: &UsageWindow) {
        let owners = match self.directory.owners(namespace).await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(namespace, "owner lookup failed, skipping namespace: {:#}", e);
                return;
            }
        };
        if owners.is_empty() {
            info!(namespace, "namespace has no owners, skipping");
            return;
        }
        let recipients = recipient_set(&self.config.mail_admins, &owners);

        match self.config.gpu_quota_mode {
            GpuQuotaMode::Unified => self.reconcile_quotas(namespace, window, &recipients).await,
            GpuQuotaMode::Legacy => {
                tokio::join!(
                    self.reconcile_quotas(namespace, window, &recipients),
                    self.reconcile_gpu_quotas(namespace, window, &recipients),
                );
            }
        }
    }

    /// CPU and memory, plus GPU when it lives in the ResourceQuota.
    async fn reconcile_quotas(&self, namespace: &str, window: &UsageWindow, recipients: &[String]) {
        let quotas = match self.cluster.list_quotas(namespace).await {
            Ok(q) => q,
            Err(e) => {
                warn!(namespace, "failed to list quotas: {:#}", e);
                return;
            }
        };

        let mut cache = UsageCache::new();
        for mut quota in quotas {
            if quota.metadata.has_label(WHITELIST_LABEL) {
                debug!(namespace, quota = quota.name(), "whitelisted, skipping");
                continue;
            }
            if !quota.has_status() {
                warn!(namespace, quota = quota.name(), "quota has no status yet, skipping");
                continue;
            }

            let mut decisions = Vec::new();
            for kind in [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Gpu] {
                let policy = self.config.policy(kind);
                if !policy.enabled {
                    continue;
                }
                if kind == ResourceKind::Gpu
                    && (self.config.gpu_quota_mode != GpuQuotaMode::Unified
                        || quota.current_limit(kind).is_none())
                {
                    continue;
                }
                let Some(usage) = self.usage(&mut cache, kind, namespace, window).await else {
                    continue;
                };
                let decision = match kind {
                    ResourceKind::Gpu => adjust_quota(
                        &mut GpuQuotaTarget::Unified(&mut quota),
                        kind,
                        usage,
                        &policy.bounds,
                    ),
                    _ => adjust_quota(&mut quota, kind, usage, &policy.bounds),
                };
                if let Some(d) = decision.filter(ScalingDecision::changed) {
                    decisions.push(d);
                }
            }

            if decisions.is_empty() {
                continue;
            }
            if let Err(e) = self.cluster.update_quota(&quota).await {
                warn!(namespace, quota = quota.name(), "failed to update quota: {:#}", e);
                self.metrics.counter_inc(QUOTA_UPDATE_FAILURES_TOTAL);
                continue;
            }
            self.announce(quota.name(), namespace, &decisions, recipients)
                .await;
        }
    }

    /// Dedicated GpuQuota objects.
    async fn reconcile_gpu_quotas(&self, namespace: &str, window: &UsageWindow, recipients: &[String]) {
        let policy = self.config.gpu;
        if !policy.enabled {
            return;
        }
        let quotas = match self.cluster.list_gpu_quotas(namespace).await {
            Ok(q) => q,
            Err(e) => {
                warn!(namespace, "failed to list gpu quotas: {:#}", e);
                return;
            }
        };

        let mut cache = UsageCache::new();
        for mut quota in quotas {
            if quota.metadata.has_label(WHITELIST_LABEL) {
                debug!(namespace, quota = quota.name(), "whitelisted, skipping");
                continue;
            }
            let Some(usage) = self
                .usage(&mut cache, ResourceKind::Gpu, namespace, window)
                .await
            else {
                return;
            };
            let Some(decision) = shrink_legacy(&mut quota, usage, &policy.bounds) else {
                continue;
            };
            if let Err(e) = self.cluster.update_gpu_quota(&quota).await {
                warn!(namespace, quota = quota.name(), "failed to update gpu quota: {:#}", e);
                self.metrics.counter_inc(QUOTA_UPDATE_FAILURES_TOTAL);
                continue;
            }
            self.announce(quota.name(), namespace, &[decision], recipients)
                .await;
        }
    }

    async fn usage(
        &self,
        cache: &mut UsageCache,
        kind: ResourceKind,
        namespace: &str,
        window: &UsageWindow,
    ) -> Option<f64> {
        if let Some(cached) = cache.get(&kind) {
            return *cached;
        }
        let result = match self.usage.window_average(kind, namespace, window).await {
            Ok(avg) => Some(avg),
            Err(e) => {
                warn!(namespace, %kind, "usage query failed: {}", e);
                self.metrics
                    .counter_inc_with(USAGE_QUERY_FAILURES_TOTAL, kind.as_str());
                None
            }
        };
        cache.insert(kind, result);
        result
    }

    /// Count and notify each persisted change.
    async fn announce(
        &self,
        quota_name: &str,
        namespace: &str,
        decisions: &[ScalingDecision],
        recipients: &[String],
    ) {
        for decision in decisions {
            info!(
                namespace,
                quota = quota_name,
                kind = %decision.kind,
                usage = decision.usage_fraction,
                "quota reduced from {} to {}",
                decision.previous_limit,
                decision.new_limit.unwrap_or(decision.previous_limit)
            );
            self.metrics
                .counter_inc_with(QUOTA_ADJUSTMENTS_TOTAL, decision.kind.as_str());

            let (subject, body) = render(&self.config.message, quota_name, namespace, decision);
            match self.notifier.send(&subject, &body, recipients).await {
                Ok(()) => self.metrics.counter_inc(NOTIFICATIONS_SENT_TOTAL),
                Err(e) => {
                    warn!(namespace, quota = quota_name, "notification failed: {:#}", e);
                    self.metrics.counter_inc(NOTIFICATIONS_FAILED_TOTAL);
                }
            }
        }
    }
}

fn shrink_legacy(
    quota: &mut GpuQuota,
    usage: f64,
    bounds: &pkg_quota::Bounds,
) -> Option<ScalingDecision> {
    let mut target = GpuQuotaTarget::Legacy(quota);
    adjust_quota(&mut target, ResourceKind::Gpu, usage, bounds).filter(ScalingDecision::changed)
}
