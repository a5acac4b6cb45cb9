use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub const QUOTA_ADJUSTMENTS_TOTAL: &str = "throttle_quota_adjustments_total";
pub const QUOTA_UPDATE_FAILURES_TOTAL: &str = "throttle_quota_update_failures_total";
pub const USAGE_QUERY_FAILURES_TOTAL: &str = "throttle_usage_query_failures_total";
pub const NOTIFICATIONS_SENT_TOTAL: &str = "throttle_notifications_sent_total";
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "throttle_notifications_failed_total";
pub const RECONCILE_RUNS_TOTAL: &str = "throttle_reconcile_runs_total";
pub const ADMISSION_REQUESTS_TOTAL: &str = "throttle_admission_requests_total";
pub const ADMISSION_DENIED_TOTAL: &str = "throttle_admission_denied_total";
pub const CLUSTER_OVERSOLD_RATIO_MILLI: &str = "throttle_cluster_oversold_ratio_milli";

/// A lightweight, thread-safe metrics registry that renders in Prometheus
/// text exposition format. Series are keyed by name plus one optional label.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Family<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Family<AtomicI64>>>,
}

/// All series sharing one metric name.
struct Family<V> {
    help: String,
    label: Option<&'static str>,
    series: RwLock<BTreeMap<String, V>>,
}

impl<V: Default> Family<V> {
    fn new(help: &str, label: Option<&'static str>) -> Self {
        Self {
            help: help.to_string(),
            label,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    fn with_series<R>(&self, label_value: &str, f: impl Fn(&V) -> R) -> R {
        if let Some(v) = self.series.read().unwrap().get(label_value) {
            return f(v);
        }
        let mut series = self.series.write().unwrap();
        f(series.entry(label_value.to_string()).or_default())
    }

    fn render(&self, name: &str, kind: &str, out: &mut String, load: impl Fn(&V) -> String) {
        out.push_str(&format!("# HELP {} {}\n", name, self.help));
        out.push_str(&format!("# TYPE {} {}\n", name, kind));
        let series = self.series.read().unwrap();
        if series.is_empty() && self.label.is_none() {
            out.push_str(&format!("{} 0\n", name));
        }
        for (value, v) in series.iter() {
            match self.label {
                Some(label) => {
                    out.push_str(&format!("{}{{{}=\"{}\"}} {}\n", name, label, value, load(v)))
                }
                None => out.push_str(&format!("{} {}\n", name, load(v))),
            }
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry pre-populated with every controller and webhook metric.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_counter(
            QUOTA_ADJUSTMENTS_TOTAL,
            "Quota limits scaled down, by resource kind.",
            Some("kind"),
        );
        registry.register_counter(
            QUOTA_UPDATE_FAILURES_TOTAL,
            "Quota writes rejected by the cluster API.",
            None,
        );
        registry.register_counter(
            USAGE_QUERY_FAILURES_TOTAL,
            "Usage queries that produced no average, by resource kind.",
            Some("kind"),
        );
        registry.register_counter(
            NOTIFICATIONS_SENT_TOTAL,
            "Quota change notifications delivered.",
            None,
        );
        registry.register_counter(
            NOTIFICATIONS_FAILED_TOTAL,
            "Quota change notifications that failed to send.",
            None,
        );
        registry.register_counter(RECONCILE_RUNS_TOTAL, "Reconciliation ticks completed.", None);
        registry.register_counter(
            ADMISSION_REQUESTS_TOTAL,
            "Admission reviews handled.",
            None,
        );
        registry.register_counter(
            ADMISSION_DENIED_TOTAL,
            "Admission reviews denied, by reason.",
            Some("reason"),
        );
        registry.register_gauge(
            CLUSTER_OVERSOLD_RATIO_MILLI,
            "Aggregate quota over physical CPU, in thousandths, at the last review.",
        );
        registry
    }

    /// Register a counter. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str, label: Option<&'static str>) {
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(name.to_string())
            .or_insert_with(|| Family::new(help, label));
    }

    /// Register an unlabelled gauge. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Family::new(help, None));
    }

    /// Increment an unlabelled counter by 1.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, "", 1);
    }

    /// Increment the series of a labelled counter by 1.
    pub fn counter_inc_with(&self, name: &str, label_value: &str) {
        self.counter_add(name, label_value, 1);
    }

    fn counter_add(&self, name: &str, label_value: &str, val: u64) {
        let counters = self.counters.read().unwrap();
        if let Some(c) = counters.get(name) {
            c.with_series(label_value, |v| v.fetch_add(val, Ordering::Relaxed));
        }
    }

    /// Current value of a counter series; 0 if never incremented.
    pub fn counter_value(&self, name: &str, label_value: &str) -> u64 {
        let counters = self.counters.read().unwrap();
        counters
            .get(name)
            .and_then(|c| {
                c.series
                    .read()
                    .unwrap()
                    .get(label_value)
                    .map(|v| v.load(Ordering::Relaxed))
            })
            .unwrap_or(0)
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, val: i64) {
        let gauges = self.gauges.read().unwrap();
        if let Some(g) = gauges.get(name) {
            g.with_series("", |v| v.store(val, Ordering::Relaxed));
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for (name, family) in self.counters.read().unwrap().iter() {
            family.render(name, "counter", &mut output, |v| {
                v.load(Ordering::Relaxed).to_string()
            });
        }
        for (name, family) in self.gauges.read().unwrap().iter() {
            family.render(name, "gauge", &mut output, |v| {
                v.load(Ordering::Relaxed).to_string()
            });
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
