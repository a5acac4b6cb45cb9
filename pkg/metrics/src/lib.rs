//! Usage metrics in, controller metrics out.
//!
//! [`prometheus`] reads windowed namespace utilization from a
//! Prometheus-compatible backend; [`registry`] exposes the controller's own
//! counters in the text exposition format.

pub mod error;
pub mod prometheus;
pub mod query;
pub mod registry;

pub use error::MetricsError;
pub use prometheus::{PrometheusGateway, UsageSource};
pub use query::UsageWindow;
pub use registry::MetricsRegistry;
