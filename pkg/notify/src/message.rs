use pkg_constants::quota::{GIB, SAMPLING_INTERVAL_SECS, SCALE_UP_MULTIPLE};
use pkg_quota::ScalingDecision;
use pkg_types::quota::ResourceKind;

/// Cluster-wide facts every notification carries.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub cluster_name: String,
    /// Link template; `{namespace}` and `{resolution}` (the usage sampling
    /// step, e.g. `2m`) are filled in.
    pub dashboard_url: String,
    pub cpu_min_rate: f64,
    pub memory_min_rate: f64,
    pub gpu_min_rate: f64,
}

impl MessageContext {
    fn min_rate(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu_min_rate,
            ResourceKind::Memory => self.memory_min_rate,
            ResourceKind::Gpu => self.gpu_min_rate,
        }
    }

    fn dashboard_link(&self, namespace: &str) -> String {
        self.dashboard_url
            .replace("{namespace}", namespace)
            .replace("{resolution}", &format!("{}m", SAMPLING_INTERVAL_SECS / 60))
    }
}

fn format_limit(kind: ResourceKind, limit: i64) -> String {
    match kind {
        ResourceKind::Cpu => format!("{}C", limit),
        ResourceKind::Memory => format!("{:.2}G", limit as f64 / GIB as f64),
        ResourceKind::Gpu => limit.to_string(),
    }
}

/// Subject and HTML body telling namespace owners that a quota shrank.
pub fn render(
    ctx: &MessageContext,
    quota_name: &str,
    namespace: &str,
    decision: &ScalingDecision,
) -> (String, String) {
    let kind = decision.kind;
    let threshold = ctx.min_rate(kind);
    let new_limit = decision.new_limit.unwrap_or(decision.previous_limit);

    let subject = format!(
        "[{}] {} quota of {} reduced: weekly usage below {}%",
        ctx.cluster_name,
        kind.label(),
        namespace,
        threshold
    );

    let mut html = String::new();
    html.push_str("<html><body>\n");
    html.push_str(&format!(
        "<p>The {} quota <b>{}</b> in namespace <b>{}</b> on cluster <b>{}</b> has been reduced.</p>\n",
        kind.label(),
        quota_name,
        namespace,
        ctx.cluster_name
    ));
    html.push_str("<table border=\"1\" cellpadding=\"4\">\n");
    html.push_str(&format!(
        "<tr><td>Average usage (last 7 days)</td><td>{:.2}%</td></tr>\n",
        decision.usage_fraction
    ));
    html.push_str(&format!(
        "<tr><td>Previous limit</td><td>{}</td></tr>\n",
        format_limit(kind, decision.previous_limit)
    ));
    html.push_str(&format!(
        "<tr><td>New limit</td><td>{}</td></tr>\n",
        format_limit(kind, new_limit)
    ));
    html.push_str(&format!(
        "<tr><td>Threshold</td><td>{}%</td></tr>\n",
        threshold
    ));
    html.push_str("</table>\n");
    if !ctx.dashboard_url.is_empty() {
        let link = ctx.dashboard_link(namespace);
        html.push_str(&format!(
            "<p>Usage dashboard: <a href=\"{0}\">{0}</a></p>\n",
            link
        ));
    }
    html.push_str(&format!(
        concat!(
            "<hr><p><small>Quota policy: limits shrink when weekly average usage stays below ",
            "CPU {}%, Memory {}%, GPU {}%. ",
            "If you need more, ask an administrator. After approval the quota is raised to ",
            "{}% of its current value, never above the original amount.</small></p>\n"
        ),
        ctx.cpu_min_rate,
        ctx.memory_min_rate,
        ctx.gpu_min_rate,
        (SCALE_UP_MULTIPLE * 100.0).round()
    ));
    html.push_str("</body></html>\n");

    (subject, html)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MessageContext {
        MessageContext {
            cluster_name: "prod-1".to_string(),
            dashboard_url: "https://grafana.example.com/d/ns?var-Namespace={namespace}&var-Resolution={resolution}"
                .to_string(),
            cpu_min_rate: 30.0,
            memory_min_rate: 40.0,
            gpu_min_rate: 10.0,
        }
    }

    #[test]
    fn cpu_message_names_limits_and_threshold() {
        let decision = ScalingDecision {
            kind: ResourceKind::Cpu,
            previous_limit: 100,
            new_limit: Some(80),
            usage_fraction: 12.5,
        };
        let (subject, html) = render(&ctx(), "compute", "team-a", &decision);

        assert!(subject.contains("CPU"));
        assert!(subject.contains("team-a"));
        assert!(subject.contains("30%"));
        assert!(html.contains("100C"));
        assert!(html.contains("80C"));
        assert!(html.contains("12.50%"));
        assert!(html.contains("var-Namespace=team-a&var-Resolution=2m"));
        assert!(html.contains("raised to 120% of its current value, never above the original amount"));
    }

    #[test]
    fn memory_is_shown_in_gib() {
        let gib = GIB as i64;
        let decision = ScalingDecision {
            kind: ResourceKind::Memory,
            previous_limit: 200 * gib,
            new_limit: Some(160 * gib),
            usage_fraction: 5.0,
        };
        let (_, html) = render(&ctx(), "compute", "team-a", &decision);
        assert!(html.contains("200.00G"));
        assert!(html.contains("160.00G"));
    }

    #[test]
    fn dashboard_link_is_optional() {
        let mut ctx = ctx();
        ctx.dashboard_url.clear();
        let decision = ScalingDecision {
            kind: ResourceKind::Gpu,
            previous_limit: 10,
            new_limit: Some(8),
            usage_fraction: 1.0,
        };
        let (_, html) = render(&ctx, "gpu", "team-a", &decision);
        assert!(!html.contains("<a href"));
        assert!(html.contains("<td>8</td>"));
    }
}
