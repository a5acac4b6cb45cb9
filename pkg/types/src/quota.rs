use pkg_constants::resources::{LIMITS_CPU, LIMITS_GPU, LIMITS_MEMORY, REQUESTS_GPU};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::meta::{ObjectMeta, ResourceList};
use crate::quantity::Quantity;

/// Resource kinds whose quotas are right-sized from historical usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Gpu,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Gpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Gpu => "gpu",
        }
    }

    /// Human-facing label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "CPU",
            ResourceKind::Memory => "Memory",
            ResourceKind::Gpu => "GPU",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- ResourceQuota ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

/// Observed quota state. Either map may be absent on a quota the API server
/// has not reconciled yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuotaStatus {
    #[serde(default)]
    pub hard: Option<ResourceList>,
    #[serde(default)]
    pub used: Option<ResourceList>,
}

/// Per-namespace resource quota. GPU lives in the same object as
/// `requests.nvidia.com/gpu` (the unified shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuota {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
    #[serde(default)]
    pub status: Option<ResourceQuotaStatus>,
}

impl ResourceQuota {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Observed hard limit for `resource`, if the status carries both maps.
    pub fn status_hard(&self, resource: &str) -> Option<Quantity> {
        self.status.as_ref()?.hard.as_ref()?.get(resource).copied()
    }

    pub fn status_used(&self, resource: &str) -> Option<Quantity> {
        self.status.as_ref()?.used.as_ref()?.get(resource).copied()
    }

    pub fn spec_hard(&self, resource: &str) -> Option<Quantity> {
        self.spec.hard.get(resource).copied()
    }

    /// True when the status has both `hard` and `used` recorded.
    pub fn has_status(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.hard.is_some() && s.used.is_some())
    }

    /// Quota field holding the limit for `kind` in this shape.
    pub fn limit_field(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Cpu => LIMITS_CPU,
            ResourceKind::Memory => LIMITS_MEMORY,
            ResourceKind::Gpu => REQUESTS_GPU,
        }
    }
}

// --- Legacy GpuQuota ---

/// Dedicated GPU quota object used by clusters that predate extended
/// resources in ResourceQuota. Its spec carries both the GPU limit and the
/// GPU request ceilings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GpuQuota {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
    #[serde(default)]
    pub status: Option<ResourceQuotaStatus>,
}

impl GpuQuota {
    pub const LIMIT_FIELD: &'static str = LIMITS_GPU;
    pub const REQUEST_FIELD: &'static str = REQUESTS_GPU;

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn has_status(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.hard.is_some() && s.used.is_some())
    }

    pub fn status_hard(&self, resource: &str) -> Option<Quantity> {
        self.status.as_ref()?.hard.as_ref()?.get(resource).copied()
    }
}
