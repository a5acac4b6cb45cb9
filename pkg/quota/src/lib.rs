//! Quota right-sizing policy.
//!
//! Pure decision logic: given a week's average usage and a quota's current
//! hard limit, decide whether the limit shrinks and to what.

pub mod adjuster;
pub mod target;

pub use adjuster::{Bounds, ResourcePolicy, ScalingDecision, adjust};
pub use target::{AdjustableQuota, GpuQuotaTarget, adjust_quota};
