/// Failure to produce a usage average. The caller logs it and skips the
/// resource for this cycle.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics backend returned HTTP {0}")]
    Status(u16),
    #[error("malformed metrics response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("metrics query failed: {0}")]
    Query(String),
    #[error("metrics query returned no data")]
    NoData,
    #[error("insufficient samples: got {got}, need at least {want}")]
    InsufficientSamples { got: usize, want: usize },
}
