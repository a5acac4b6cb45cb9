//! Network-related constants.

/// Default Prometheus-compatible query endpoint.
pub const DEFAULT_PROMETHEUS_URL: &str = "http://127.0.0.1:9090";

/// Default listen address of the admission webhook.
pub const DEFAULT_WEBHOOK_LISTEN: &str = "0.0.0.0:443";

/// Path of the range-query API, relative to the Prometheus base URL.
pub const PROMETHEUS_QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// Request header carrying the generated request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Implicit-TLS SMTP port. Other ports upgrade with STARTTLS when offered.
pub const SMTPS_PORT: u16 = 465;

/// Default SMTP submission port.
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Display name on outgoing notification mail.
pub const MAIL_SENDER_NAME: &str = "9n-cloud";
