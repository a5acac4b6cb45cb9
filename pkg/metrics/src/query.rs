use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pkg_constants::quota::{SAMPLING_INTERVAL_SECS, USAGE_WINDOW_DAYS};
use pkg_types::quota::ResourceKind;

/// Time range and resolution of one usage query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step_secs: u64,
}

impl UsageWindow {
    /// From local midnight seven days ago until `now`, at the standard
    /// two-minute step.
    pub fn last_week<Tz: TimeZone>(now: DateTime<Tz>) -> Self {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            // Midnight can be skipped by a DST jump; fall back to now.
            .unwrap_or_else(|| now.with_timezone(&Utc));
        Self {
            start: midnight - TimeDelta::days(USAGE_WINDOW_DAYS),
            end: now.with_timezone(&Utc),
            step_secs: SAMPLING_INTERVAL_SECS,
        }
    }
}

/// PromQL expression for a namespace's utilization of `kind`, in percent.
pub fn usage_query(kind: ResourceKind, namespace: &str) -> String {
    match kind {
        ResourceKind::Cpu => format!(
            concat!(
                r#"(sum(rate(container_cpu_usage_seconds_total{{image!="",name=~"^k8s_.*",pod_name!="",namespace="{ns}"}}[1m])) by (namespace))"#,
                r#" / (sum(kube_pod_container_resource_requests_cpu_cores{{pod!="",node!="",namespace="{ns}",pod_phase=~"Pending|Running"}}) by (namespace)) * 100"#,
            ),
            ns = namespace
        ),
        ResourceKind::Memory => format!(
            concat!(
                r#"(sum(container_memory_usage_bytes{{image!="",name=~"^k8s_.*",pod_name!="",namespace="{ns}"}}) by (namespace))"#,
                r#" / (sum(kube_pod_container_resource_requests_memory_bytes{{pod!="",node!="",namespace="{ns}",pod_phase=~"Pending|Running"}}) by (namespace)) * 100"#,
            ),
            ns = namespace
        ),
        ResourceKind::Gpu => format!(
            concat!(
                r#"(sum(container_accelerator_duty_cycle{{image!="",name=~"^k8s_.*",pod_name!="",pod_name!~"nvidia-device-plugin-daemonset.*",namespace="{ns}"}} / 100) by (namespace))"#,
                r#" / (count(container_accelerator_duty_cycle{{image!="",name=~"^k8s_.*",pod_name!="",pod_name!~"nvidia-device-plugin-daemonset.*",namespace="{ns}"}}) by (namespace)) * 100"#,
            ),
            ns = namespace
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn window_starts_at_midnight_a_week_ago() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 15, 13, 45, 0).unwrap();
        let window = UsageWindow::last_week(now);

        let expected_start = tz.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        assert_eq!(window.start, expected_start.with_timezone(&Utc));
        assert_eq!(window.end, now.with_timezone(&Utc));
        assert_eq!(window.step_secs, 120);
    }

    #[test]
    fn full_window_holds_enough_samples() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let window = UsageWindow::last_week(now);
        let points = (window.end - window.start).num_seconds() as u64 / window.step_secs;
        assert!(points >= 120);
    }

    #[test]
    fn queries_are_scoped_to_namespace() {
        for kind in ResourceKind::ALL {
            let q = usage_query(kind, "team-a");
            assert!(q.contains(r#"namespace="team-a""#), "{}", q);
            assert!(q.ends_with("* 100"));
        }
        assert!(usage_query(ResourceKind::Gpu, "x").contains("nvidia-device-plugin"));
    }
}
