use pkg_constants::quota::{GIB, MEMORY_USAGE_TOLERANCE, SCALE_DOWN_MULTIPLE};
use pkg_types::quota::ResourceKind;
use serde::{Deserialize, Serialize};

/// Thresholds for one resource kind.
///
/// Rates are usage percentages (0–100). `min_quota` is in the kind's policy
/// unit: whole cores, whole GiB, or whole GPUs. `max_rate` and `max_quota`
/// are accepted and reported but never acted on: the policy only shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_rate: f64,
    pub max_rate: f64,
    pub min_quota: i64,
    pub max_quota: i64,
}

/// Whether a kind is reconciled, and with which bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub enabled: bool,
    pub bounds: Bounds,
}

impl ResourcePolicy {
    pub fn default_for(kind: ResourceKind) -> Self {
        let bounds = match kind {
            ResourceKind::Cpu => Bounds {
                min_rate: 30.0,
                max_rate: 80.0,
                min_quota: 60,
                max_quota: 1000,
            },
            ResourceKind::Memory => Bounds {
                min_rate: 40.0,
                max_rate: 80.0,
                min_quota: 100,
                max_quota: 10000,
            },
            ResourceKind::Gpu => Bounds {
                min_rate: 10.0,
                max_rate: 80.0,
                min_quota: 0,
                max_quota: 100,
            },
        };
        Self {
            enabled: true,
            bounds,
        }
    }
}

/// Outcome of one policy evaluation. `new_limit` is `Some` only when the
/// limit changed, and then always lies in `[floor, previous_limit]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingDecision {
    pub kind: ResourceKind,
    pub previous_limit: i64,
    pub new_limit: Option<i64>,
    pub usage_fraction: f64,
}

impl ScalingDecision {
    fn unchanged(kind: ResourceKind, previous_limit: i64, usage_fraction: f64) -> Self {
        Self {
            kind,
            previous_limit,
            new_limit: None,
            usage_fraction,
        }
    }

    pub fn changed(&self) -> bool {
        self.new_limit.is_some()
    }
}

/// Scale-down rule shared by every kind.
///
/// A limit shrinks to 80% (never below the floor) when usage is under
/// `min_rate` and the limit is above `min_quota`. Memory usage gets
/// [`MEMORY_USAGE_TOLERANCE`] points of slack and is compared against the
/// floor in whole GiB; `previous_limit` for memory is in bytes.
pub fn adjust(
    kind: ResourceKind,
    previous_limit: i64,
    usage_fraction: f64,
    bounds: &Bounds,
) -> ScalingDecision {
    let (below_threshold, above_floor, floor) = match kind {
        ResourceKind::Memory => {
            let gib = GIB as i64;
            (
                usage_fraction + MEMORY_USAGE_TOLERANCE < bounds.min_rate,
                previous_limit / gib > bounds.min_quota,
                bounds.min_quota.saturating_mul(gib),
            )
        }
        ResourceKind::Cpu | ResourceKind::Gpu => (
            usage_fraction < bounds.min_rate,
            previous_limit > bounds.min_quota,
            bounds.min_quota,
        ),
    };

    if !below_threshold || !above_floor {
        return ScalingDecision::unchanged(kind, previous_limit, usage_fraction);
    }

    let scaled = (previous_limit as f64 * SCALE_DOWN_MULTIPLE) as i64;
    let new_limit = scaled.max(floor).min(previous_limit);

    ScalingDecision {
        kind,
        previous_limit,
        new_limit: Some(new_limit),
        usage_fraction,
    }
}
