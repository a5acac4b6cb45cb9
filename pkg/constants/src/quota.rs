//! Quota adjustment policy constants.

/// Multiplier applied to a quota limit when it is scaled down.
pub const SCALE_DOWN_MULTIPLE: f64 = 0.8;

/// Multiplier granted when an owner asks for a quota to be raised again.
/// Only quoted in notification text; the controller never scales up.
pub const SCALE_UP_MULTIPLE: f64 = 1.2;

/// Percentage points added to memory usage before comparing it with the
/// minimum rate, absorbing sampling noise.
pub const MEMORY_USAGE_TOLERANCE: f64 = 4.0;

/// One gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Sampling step of the usage query, in minutes.
pub const SAMPLING_INTERVAL_MINUTES: u64 = 2;

/// Sampling step of the usage query, in seconds.
pub const SAMPLING_INTERVAL_SECS: u64 = SAMPLING_INTERVAL_MINUTES * 60;

/// Days of history averaged per reconciliation.
pub const USAGE_WINDOW_DAYS: i64 = 7;

/// A usage series with fewer points than this is treated as a gap in the
/// metrics backend and never averaged.
pub const MIN_USAGE_SAMPLES: usize = 120;

/// Default reconciliation period: one week, in minutes.
pub const DEFAULT_SYNC_PERIOD_MINUTES: i64 = 7 * 24 * 60;

/// Default upper bound on namespaces reconciled concurrently within a tick.
pub const DEFAULT_MAX_CONCURRENT_NAMESPACES: usize = 16;

/// Quotas carrying this label are never adjusted.
pub const WHITELIST_LABEL: &str = "whitelist";
