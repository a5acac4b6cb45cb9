use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use pkg_metrics::MetricsRegistry;
use pkg_metrics::registry::{ADMISSION_DENIED_TOTAL, ADMISSION_REQUESTS_TOTAL};
use pkg_types::admission::{AdmissionResponse, AdmissionReview};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::gate::AdmissionGate;
use crate::request_id::request_id_middleware;
use crate::tls;

/// Where and how the webhook listens.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub listen: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Clone)]
pub struct WebhookState {
    pub gate: Arc<AdmissionGate>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", post(review))
        .route("/pods", post(review))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Load TLS material and bind, then serve in the background until
/// `shutdown` flips. Bad certificates and busy ports fail here, before the
/// task is spawned.
pub async fn start_webhook(
    config: WebhookConfig,
    state: WebhookState,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let tls = tls::load_server_config(&config.cert_file, &config.key_file)?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind webhook on {}", config.listen))?;
    info!("Starting admission webhook on {}", config.listen);
    Ok(tokio::spawn(tls::serve(
        listener,
        Arc::new(tls),
        router(state),
        shutdown,
    )))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("application/json"))
}

/// POST /: AdmissionReview in, AdmissionReview out.
async fn review(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    state.metrics.counter_inc(ADMISSION_REQUESTS_TOTAL);

    if !is_json(&headers) {
        warn!("admission review with content type {:?}", headers.get(CONTENT_TYPE));
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected Content-Type application/json",
        )
            .into_response();
    }

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("failed to decode admission review: {}", e);
            state
                .metrics
                .counter_inc_with(ADMISSION_DENIED_TOTAL, "decode_error");
            let resp = AdmissionResponse::deny(format!("decode admission review: {}", e));
            return Json(AdmissionReview::respond("", resp)).into_response();
        }
    };
    let Some(request) = review.request else {
        state
            .metrics
            .counter_inc_with(ADMISSION_DENIED_TOTAL, "decode_error");
        let resp = AdmissionResponse::deny("admission review carries no request");
        return Json(AdmissionReview::respond("", resp)).into_response();
    };

    let response = state.gate.decide(&request).await;
    Json(AdmissionReview::respond(&request.uid, response)).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<WebhookState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateConfig;
    use pkg_cluster::MemoryCluster;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::node::{Node, NodeStatus};

    async fn serve() -> (String, Arc<MetricsRegistry>) {
        let node = Node {
            metadata: ObjectMeta::named("", "w1"),
            status: NodeStatus {
                capacity: [("cpu".to_string(), "32".parse().unwrap())].into_iter().collect(),
                ..Default::default()
            },
        };
        let cluster = MemoryCluster::new().with_node(node);
        let metrics = Arc::new(MetricsRegistry::with_defaults());
        let gate = AdmissionGate::new(Arc::new(cluster), GateConfig::default(), metrics.clone());
        let app = router(WebhookState {
            gate: Arc::new(gate),
            metrics: metrics.clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), metrics)
    }

    fn review_body() -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "7f0b2e1c",
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "team-a",
                "operation": "CREATE",
                "object": {
                    "metadata": {"name": "p", "namespace": "team-a"},
                    "spec": {"containers": [{"name": "c", "resources": {"limits": {"cpu": "1"}}}]}
                }
            }
        })
    }

    #[tokio::test]
    async fn review_echoes_uid() {
        let (base, metrics) = serve().await;
        let resp = reqwest::Client::new()
            .post(&base)
            .json(&review_body())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().contains_key("x-request-id"));

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(body["kind"], "AdmissionReview");
        assert_eq!(body["response"]["uid"], "7f0b2e1c");
        assert_eq!(body["response"]["allowed"], true);
        assert!(body.get("request").is_none());
        assert_eq!(metrics.counter_value(ADMISSION_REQUESTS_TOTAL, ""), 1);
    }

    #[tokio::test]
    async fn non_json_is_unsupported_media_type() {
        let (base, _) = serve().await;
        let resp = reqwest::Client::new()
            .post(&base)
            .header("content-type", "text/plain")
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 415);
    }

    #[tokio::test]
    async fn garbage_body_is_denied() {
        let (base, _) = serve().await;
        let resp = reqwest::Client::new()
            .post(&base)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["response"]["allowed"], false);
        assert!(
            body["response"]["status"]["message"]
                .as_str()
                .unwrap()
                .starts_with("decode admission review")
        );
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let (base, _) = serve().await;
        let client = reqwest::Client::new();
        let health = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let metrics = client
            .get(format!("{}/metrics", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("throttle_admission_requests_total"));
    }
}
