use async_trait::async_trait;
use pkg_constants::network::PROMETHEUS_QUERY_RANGE_PATH;
use pkg_constants::quota::MIN_USAGE_SAMPLES;
use pkg_types::quota::ResourceKind;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::error::MetricsError;
use crate::query::{UsageWindow, usage_query};

/// Source of windowed namespace utilization.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Mean utilization (percent) of `kind` in `namespace` over `window`.
    async fn window_average(
        &self,
        kind: ResourceKind,
        namespace: &str,
        window: &UsageWindow,
    ) -> Result<f64, MetricsError>;
}

// --- Range query response ---

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    #[serde(default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: SeriesLabels,
    /// `[unix_timestamp, "value"]` pairs.
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesLabels {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Mean of the first series. Later series are ignored: a query is scoped to
/// one namespace and aggregated by it, so only one series is expected.
pub fn series_average(response: &QueryResponse) -> Result<f64, MetricsError> {
    if response.status != "success" {
        return Err(MetricsError::Query(
            response
                .error
                .clone()
                .unwrap_or_else(|| format!("status {}", response.status)),
        ));
    }
    let first = response
        .data
        .as_ref()
        .and_then(|d| d.result.first())
        .ok_or(MetricsError::NoData)?;
    if first.values.is_empty() {
        return Err(MetricsError::NoData);
    }
    if first.values.len() < MIN_USAGE_SAMPLES {
        return Err(MetricsError::InsufficientSamples {
            got: first.values.len(),
            want: MIN_USAGE_SAMPLES,
        });
    }

    let samples: Vec<f64> = first
        .values
        .iter()
        .filter_map(|(_, v)| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect();
    if samples.is_empty() {
        return Err(MetricsError::NoData);
    }
    Ok(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Range-query client for a Prometheus-compatible backend.
///
/// No retries: a failed query is retried by the next reconciliation.
#[derive(Clone)]
pub struct PrometheusGateway {
    base_url: String,
    http: reqwest::Client,
}

impl PrometheusGateway {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn range_url(
        &self,
        kind: ResourceKind,
        namespace: &str,
        window: &UsageWindow,
    ) -> Result<Url, MetricsError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, PROMETHEUS_QUERY_RANGE_PATH))
            .map_err(|e| MetricsError::Query(format!("invalid metrics url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("query", &usage_query(kind, namespace))
            .append_pair("start", &window.start.timestamp().to_string())
            .append_pair("end", &window.end.timestamp().to_string())
            .append_pair("step", &window.step_secs.to_string());
        Ok(url)
    }
}

#[async_trait]
impl UsageSource for PrometheusGateway {
    async fn window_average(
        &self,
        kind: ResourceKind,
        namespace: &str,
        window: &UsageWindow,
    ) -> Result<f64, MetricsError> {
        let url = self.range_url(kind, namespace, window)?;
        debug!(%kind, namespace, "querying usage");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MetricsError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        let parsed: QueryResponse = serde_json::from_slice(&body)?;
        series_average(&parsed)
    }
}
