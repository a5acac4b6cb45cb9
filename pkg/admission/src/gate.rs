use pkg_cluster::ClusterClient;
use pkg_constants::admission::{DEFAULT_SCORE_THRESHOLD, SCORE_EPSILON};
use pkg_constants::resources::{LIMITS_CPU, REQUESTS_CPU};
use pkg_metrics::MetricsRegistry;
use pkg_metrics::registry::{ADMISSION_DENIED_TOTAL, CLUSTER_OVERSOLD_RATIO_MILLI};
use pkg_types::admission::{AdmissionRequest, AdmissionResponse, GroupVersionResource};
use pkg_types::pod::Pod;
use pkg_types::quantity::Quantity;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::usage::{AdmissionContext, ClusterSnapshot, NamespaceCpuQuota, PodCpu, QuotaUse, pod_cpu};

/// Admission tuning, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Pods are refused when the pressure score falls below this.
    pub threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// Pressure score of an oversubscribed cluster. Falls as quota in use,
/// node busyness and quota saturation rise.
///
/// `used` is quota in use in cores; `busy` and `usage_fraction` are ratios.
pub fn score(used: f64, busy: f64, usage_fraction: f64) -> f64 {
    let eps = SCORE_EPSILON;
    (1.0 / (used + eps)).ln() / ((1.0 / (1.0 - busy + eps)).ln() + (1.0 / (usage_fraction + eps)).ln())
}

/// Deny reason from cluster-wide pressure, if any.
pub fn pressure_check(ctx: &AdmissionContext, threshold: f64) -> Option<String> {
    if ctx.quota_total <= ctx.cluster_total {
        return None;
    }
    if ctx.cluster_total.is_zero() {
        warn!("no schedulable worker CPU; skipping pressure check");
        return None;
    }
    let cluster_total = ctx.cluster_total.as_f64();
    let quota_total = ctx.quota_total.as_f64();
    let used = ctx.quota_used.as_f64();

    let oversold = quota_total / cluster_total;
    let busy = ctx.cluster_used.as_f64() / cluster_total;
    if oversold <= 1.0 {
        return None;
    }
    // Quota that fits on real hardware.
    let base = quota_total / oversold;
    if used <= base {
        return None;
    }
    let usage_fraction = used / quota_total;
    let s = score(used, busy, usage_fraction);
    debug!(oversold, busy, usage_fraction, score = s, "cluster pressure");
    if s < threshold {
        Some(format!(
            "cluster resource is busy: score {:.3} below threshold {}",
            s, threshold
        ))
    } else {
        None
    }
}

fn check_key(key: &str, quota: Option<QuotaUse>, delta: Quantity) -> Option<String> {
    let quota = quota?;
    if quota.remaining() >= delta {
        return None;
    }
    Some(format!(
        "exceeded quota: {}, requested({}) + used({}) > limited({})",
        key, delta, quota.used, quota.hard
    ))
}

/// Deny reasons from the namespace's own CPU quota. On update only the
/// growth over the old pod counts.
pub fn headroom_check(quota: &NamespaceCpuQuota, new: PodCpu, old: PodCpu) -> Vec<String> {
    [
        check_key(REQUESTS_CPU, quota.requests, new.request - old.request),
        check_key(LIMITS_CPU, quota.limits, new.limit - old.limit),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn decode_pod(value: &serde_json::Value, what: &str) -> Result<Pod, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("decode {}: {}", what, e))
}

/// Decides pod admission against live cluster and quota occupancy.
///
/// Fails closed: any error refuses the pod with the error as the message.
pub struct AdmissionGate {
    cluster: Arc<dyn ClusterClient>,
    config: GateConfig,
    metrics: Arc<MetricsRegistry>,
}

impl AdmissionGate {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: GateConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            cluster,
            config,
            metrics,
        }
    }

    fn deny(&self, reason: &str, message: String) -> AdmissionResponse {
        self.metrics.counter_inc_with(ADMISSION_DENIED_TOTAL, reason);
        AdmissionResponse::deny(message)
    }

    pub async fn decide(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let pods = GroupVersionResource::pods();
        if request.resource != pods {
            warn!(uid = %request.uid, resource = %request.resource, "unexpected resource");
            return self.deny("invalid_request", format!("expect resource to be {}", pods));
        }

        let Some(object) = request.object.as_ref() else {
            return self.deny("decode_error", "admission request carries no object".to_string());
        };
        let pod = match decode_pod(object, "pod") {
            Ok(p) => p,
            Err(msg) => return self.deny("decode_error", msg),
        };
        let old_pod = match request.old_object.as_ref().map(|v| decode_pod(v, "old pod")) {
            Some(Ok(p)) => Some(p),
            Some(Err(msg)) => return self.deny("decode_error", msg),
            None => None,
        };

        let snapshot = match ClusterSnapshot::capture(self.cluster.as_ref()).await {
            Ok(s) => s,
            Err(e) => {
                warn!(uid = %request.uid, "failed to read cluster state: {:#}", e);
                return self.deny("cluster_state", format!("calc cluster cpu usage: {:#}", e));
            }
        };

        let ctx = snapshot.context();
        if !ctx.cluster_total.is_zero() {
            let ratio = ctx.quota_total.millis() as f64 / ctx.cluster_total.millis() as f64;
            self.metrics
                .gauge_set(CLUSTER_OVERSOLD_RATIO_MILLI, (ratio * 1000.0).round() as i64);
        }

        let busy = pressure_check(&ctx, self.config.threshold);

        let namespace = if request.namespace.is_empty() {
            pod.metadata.namespace.as_str()
        } else {
            request.namespace.as_str()
        };
        let quota = snapshot.namespace_quota(namespace);
        let old = old_pod.as_ref().map(pod_cpu).unwrap_or_default();
        let exceeded = headroom_check(&quota, pod_cpu(&pod), old);

        // One denial per request; pressure wins the label.
        let label = if busy.is_some() { "busy" } else { "quota_exceeded" };
        let reasons: Vec<String> = busy.into_iter().chain(exceeded).collect();
        if reasons.is_empty() {
            debug!(uid = %request.uid, namespace, "pod admitted");
            AdmissionResponse::allow()
        } else {
            let message = reasons.join("; ");
            info!(uid = %request.uid, namespace, "pod denied: {}", message);
            self.deny(label, message)
        }
    }
}
