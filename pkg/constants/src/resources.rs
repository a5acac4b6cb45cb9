//! Resource names as they appear in quota and pod resource lists.

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

pub const REQUESTS_CPU: &str = "requests.cpu";
pub const LIMITS_CPU: &str = "limits.cpu";
pub const REQUESTS_MEMORY: &str = "requests.memory";
pub const LIMITS_MEMORY: &str = "limits.memory";

/// GPU field of a unified ResourceQuota.
pub const REQUESTS_GPU: &str = "requests.nvidia.com/gpu";

/// GPU limit field of a legacy dedicated GpuQuota.
pub const LIMITS_GPU: &str = "limits.nvidia.com/gpu";

/// Nodes carrying either label are control-plane nodes.
pub const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];
