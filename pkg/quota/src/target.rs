use pkg_types::quantity::Quantity;
use pkg_types::quota::{GpuQuota, ResourceKind, ResourceQuota};
use tracing::warn;

use crate::adjuster::{Bounds, ScalingDecision, adjust};

/// A quota object the policy can read a limit from and write a new one to.
///
/// Limits are exchanged in policy units: whole cores for CPU, bytes for
/// memory, whole devices for GPU.
pub trait AdjustableQuota {
    fn quota_name(&self) -> &str;
    fn quota_namespace(&self) -> &str;

    /// True when the observed status carries both `hard` and `used`.
    fn has_status(&self) -> bool;

    /// Observed hard limit for `kind`, `None` when the field is missing.
    fn current_limit(&self, kind: ResourceKind) -> Option<i64>;

    /// Record `new_limit` in the desired spec.
    fn apply_limit(&mut self, kind: ResourceKind, new_limit: i64);
}

impl AdjustableQuota for ResourceQuota {
    fn quota_name(&self) -> &str {
        self.name()
    }

    fn quota_namespace(&self) -> &str {
        self.namespace()
    }

    fn has_status(&self) -> bool {
        ResourceQuota::has_status(self)
    }

    fn current_limit(&self, kind: ResourceKind) -> Option<i64> {
        self.status_hard(ResourceQuota::limit_field(kind))
            .map(|q| q.value())
    }

    fn apply_limit(&mut self, kind: ResourceKind, new_limit: i64) {
        self.spec.hard.insert(
            ResourceQuota::limit_field(kind).to_string(),
            Quantity::from_value(new_limit),
        );
    }
}

/// The two shapes GPU quota comes in. Both obey the same contract; the
/// legacy shape keeps its limit and request ceilings equal.
#[derive(Debug)]
pub enum GpuQuotaTarget<'a> {
    Legacy(&'a mut GpuQuota),
    Unified(&'a mut ResourceQuota),
}

impl AdjustableQuota for GpuQuotaTarget<'_> {
    fn quota_name(&self) -> &str {
        match self {
            GpuQuotaTarget::Legacy(q) => q.name(),
            GpuQuotaTarget::Unified(q) => q.name(),
        }
    }

    fn quota_namespace(&self) -> &str {
        match self {
            GpuQuotaTarget::Legacy(q) => q.namespace(),
            GpuQuotaTarget::Unified(q) => q.namespace(),
        }
    }

    fn has_status(&self) -> bool {
        match self {
            GpuQuotaTarget::Legacy(q) => q.has_status(),
            GpuQuotaTarget::Unified(q) => q.has_status(),
        }
    }

    fn current_limit(&self, kind: ResourceKind) -> Option<i64> {
        if kind != ResourceKind::Gpu {
            return None;
        }
        match self {
            GpuQuotaTarget::Legacy(q) => q.status_hard(GpuQuota::LIMIT_FIELD).map(|v| v.value()),
            GpuQuotaTarget::Unified(q) => q.current_limit(kind),
        }
    }

    fn apply_limit(&mut self, kind: ResourceKind, new_limit: i64) {
        if kind != ResourceKind::Gpu {
            return;
        }
        match self {
            GpuQuotaTarget::Legacy(q) => {
                let value = Quantity::from_value(new_limit);
                q.spec.hard.insert(GpuQuota::LIMIT_FIELD.to_string(), value);
                q.spec.hard.insert(GpuQuota::REQUEST_FIELD.to_string(), value);
            }
            GpuQuotaTarget::Unified(q) => q.apply_limit(kind, new_limit),
        }
    }
}

/// Evaluate the policy for one kind of one quota object and, when the limit
/// shrinks, write it into the object's spec.
///
/// Returns `None` when the quota lacks the status or the limit field; that
/// is logged and treated as a no-op so the caller moves on.
pub fn adjust_quota<Q: AdjustableQuota + ?Sized>(
    quota: &mut Q,
    kind: ResourceKind,
    usage_fraction: f64,
    bounds: &Bounds,
) -> Option<ScalingDecision> {
    if !quota.has_status() {
        warn!(
            namespace = quota.quota_namespace(),
            quota = quota.quota_name(),
            %kind,
            "quota status is missing hard or used"
        );
        return None;
    }
    let Some(previous) = quota.current_limit(kind) else {
        warn!(
            namespace = quota.quota_namespace(),
            quota = quota.quota_name(),
            %kind,
            "quota status has no hard limit for this resource"
        );
        return None;
    };

    let decision = adjust(kind, previous, usage_fraction, bounds);
    if let Some(new_limit) = decision.new_limit {
        quota.apply_limit(kind, new_limit);
    }
    Some(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::meta::{ObjectMeta, ResourceList};
    use pkg_types::quota::{ResourceQuotaSpec, ResourceQuotaStatus};

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.parse().unwrap()))
            .collect()
    }

    fn status(hard: ResourceList) -> Option<ResourceQuotaStatus> {
        Some(ResourceQuotaStatus {
            hard: Some(hard.clone()),
            used: Some(hard),
        })
    }

    fn bounds(min_rate: f64, min_quota: i64) -> Bounds {
        Bounds {
            min_rate,
            max_rate: 80.0,
            min_quota,
            max_quota: 1000,
        }
    }

    fn quota(hard: &[(&str, &str)]) -> ResourceQuota {
        ResourceQuota {
            metadata: ObjectMeta::named("team-a", "compute"),
            spec: ResourceQuotaSpec { hard: list(hard) },
            status: status(list(hard)),
        }
    }

    #[test]
    fn cpu_limit_read_in_whole_cores_and_written_back() {
        let mut rq = quota(&[("limits.cpu", "100"), ("limits.memory", "200Gi")]);
        let d = adjust_quota(&mut rq, ResourceKind::Cpu, 5.0, &bounds(30.0, 10)).unwrap();
        assert_eq!(d.previous_limit, 100);
        assert_eq!(d.new_limit, Some(80));
        assert_eq!(rq.spec_hard("limits.cpu").unwrap().value(), 80);
        // Other fields untouched.
        assert_eq!(rq.spec_hard("limits.memory"), "200Gi".parse().ok());
    }

    #[test]
    fn unchanged_decision_leaves_spec_alone() {
        let mut rq = quota(&[("limits.cpu", "100")]);
        let before = rq.clone();
        let d = adjust_quota(&mut rq, ResourceKind::Cpu, 50.0, &bounds(30.0, 10)).unwrap();
        assert!(!d.changed());
        assert_eq!(rq, before);
    }

    #[test]
    fn missing_status_is_noop() {
        let mut rq = quota(&[("limits.cpu", "100")]);
        rq.status = Some(ResourceQuotaStatus {
            hard: Some(list(&[("limits.cpu", "100")])),
            used: None,
        });
        assert!(adjust_quota(&mut rq, ResourceKind::Cpu, 0.0, &bounds(30.0, 10)).is_none());
    }

    #[test]
    fn missing_field_is_noop() {
        let mut rq = quota(&[("limits.cpu", "100")]);
        assert!(adjust_quota(&mut rq, ResourceKind::Memory, 0.0, &bounds(40.0, 1)).is_none());
    }

    #[test]
    fn unified_gpu_updates_single_field() {
        let mut rq = quota(&[("requests.nvidia.com/gpu", "10"), ("limits.cpu", "100")]);
        let mut target = GpuQuotaTarget::Unified(&mut rq);
        let d = adjust_quota(&mut target, ResourceKind::Gpu, 1.0, &bounds(10.0, 0)).unwrap();
        assert_eq!(d.new_limit, Some(8));
        assert_eq!(rq.spec_hard("requests.nvidia.com/gpu").unwrap().value(), 8);
        assert!(rq.spec_hard("limits.nvidia.com/gpu").is_none());
    }

    #[test]
    fn legacy_gpu_updates_limit_and_request_together() {
        let hard = list(&[("limits.nvidia.com/gpu", "10"), ("requests.nvidia.com/gpu", "10")]);
        let mut gq = GpuQuota {
            metadata: ObjectMeta::named("team-a", "gpu"),
            spec: ResourceQuotaSpec { hard: hard.clone() },
            status: status(hard),
        };
        let mut target = GpuQuotaTarget::Legacy(&mut gq);
        let d = adjust_quota(&mut target, ResourceKind::Gpu, 0.0, &bounds(10.0, 0)).unwrap();
        assert_eq!(d.new_limit, Some(8));
        assert_eq!(gq.spec.hard["limits.nvidia.com/gpu"].value(), 8);
        assert_eq!(gq.spec.hard["requests.nvidia.com/gpu"].value(), 8);
    }

    #[test]
    fn gpu_target_ignores_other_kinds() {
        let mut rq = quota(&[("limits.cpu", "100")]);
        let mut target = GpuQuotaTarget::Unified(&mut rq);
        assert!(adjust_quota(&mut target, ResourceKind::Cpu, 0.0, &bounds(30.0, 10)).is_none());
    }
}
