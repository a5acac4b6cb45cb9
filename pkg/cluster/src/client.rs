use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as core;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use pkg_types::namespace::Namespace;
use pkg_types::node::Node;
use pkg_types::pod::Pod;
use pkg_types::quota::{GpuQuota, ResourceQuota};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::ClusterClient;
use crate::convert;

const GPU_QUOTA_GROUP: &str = "throttle.io";
const GPU_QUOTA_VERSION: &str = "v1alpha1";

/// How to reach the cluster API server.
///
/// With no kubeconfig the configuration is inferred: `KUBECONFIG`, then
/// `~/.kube/config`, then the in-cluster service account. `master`
/// overrides the server address of whichever source was used.
#[derive(Debug, Clone, Default)]
pub struct ApiClusterConfig {
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

/// Resolve an [`ApiClusterConfig`] into a client configuration.
pub async fn load_config(settings: &ApiClusterConfig) -> anyhow::Result<Config> {
    let mut config = match (&settings.kubeconfig, &settings.master) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("invalid kubeconfig {}", path.display()))?
        }
        (None, Some(master)) => match Config::infer().await {
            Ok(config) => config,
            Err(e) => {
                debug!("no ambient cluster config ({}), using bare master {}", e, master);
                Config::new(
                    master
                        .parse()
                        .with_context(|| format!("invalid master URL {}", master))?,
                )
            }
        },
        (None, None) => Config::infer()
            .await
            .context("no kubeconfig given and none could be inferred")?,
    };
    if let Some(master) = &settings.master {
        config.cluster_url = master
            .parse()
            .with_context(|| format!("invalid master URL {}", master))?;
    }
    if settings.insecure_skip_tls_verify {
        config.accept_invalid_certs = true;
    }
    Ok(config)
}

/// Cluster API client backed by `kube`. Writes are merge patches of
/// `spec.hard`, so every other field of a quota is left as the server has it.
#[derive(Clone)]
pub struct ApiClusterClient {
    client: Client,
}

impl ApiClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(settings: &ApiClusterConfig) -> anyhow::Result<Self> {
        let config = load_config(settings).await?;
        info!("Using cluster API server at {}", config.cluster_url);
        let client = Client::try_from(config).context("failed to build cluster API client")?;
        Ok(Self::new(client))
    }

    fn gpu_quotas(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(GPU_QUOTA_GROUP, GPU_QUOTA_VERSION, "GpuQuota");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "gpuquotas");
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl ClusterClient for ApiClusterClient {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        let api: Api<core::Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("failed to list namespaces")?;
        Ok(list.items.iter().map(convert::namespace).collect())
    }

    async fn list_quotas(&self, namespace: &str) -> anyhow::Result<Vec<ResourceQuota>> {
        let api: Api<core::ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list quotas in {}", namespace))?;
        list.items.iter().map(convert::resource_quota).collect()
    }

    async fn list_all_quotas(&self) -> anyhow::Result<Vec<ResourceQuota>> {
        let api: Api<core::ResourceQuota> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("failed to list quotas")?;
        list.items.iter().map(convert::resource_quota).collect()
    }

    async fn update_quota(&self, quota: &ResourceQuota) -> anyhow::Result<()> {
        let api: Api<core::ResourceQuota> =
            Api::namespaced(self.client.clone(), quota.namespace());
        let patch = convert::hard_limits_patch(&quota.metadata, &quota.spec.hard);
        debug!(namespace = quota.namespace(), quota = quota.name(), "patching spec.hard");
        api.patch(quota.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch quota {}/{}", quota.namespace(), quota.name()))?;
        Ok(())
    }

    async fn list_gpu_quotas(&self, namespace: &str) -> anyhow::Result<Vec<GpuQuota>> {
        let list = self
            .gpu_quotas(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list gpu quotas in {}", namespace))?;
        list.items.iter().map(convert::gpu_quota).collect()
    }

    async fn update_gpu_quota(&self, quota: &GpuQuota) -> anyhow::Result<()> {
        let patch = convert::hard_limits_patch(&quota.metadata, &quota.spec.hard);
        debug!(namespace = quota.namespace(), quota = quota.name(), "patching gpu spec.hard");
        self.gpu_quotas(quota.namespace())
            .patch(quota.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| {
                format!("failed to patch gpu quota {}/{}", quota.namespace(), quota.name())
            })?;
        Ok(())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let api: Api<core::Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("failed to list nodes")?;
        list.items.iter().map(convert::node).collect()
    }

    async fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        let api: Api<core::Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("failed to list pods")?;
        list.items.iter().map(convert::pod).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
    };
    use serde_json::{Value, json};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    type Stored = Arc<Mutex<Value>>;

    /// JSON merge patch as the API server applies it.
    fn merge(target: &mut Value, patch: &Value) {
        match (target, patch) {
            (Value::Object(t), Value::Object(p)) => {
                for (k, v) in p {
                    if v.is_null() {
                        t.remove(k);
                    } else {
                        merge(t.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
            (t, p) => *t = p.clone(),
        }
    }

    fn stored_quota() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": {
                "name": "compute",
                "namespace": "team-a",
                "resourceVersion": "7",
                "annotations": {"owner": "ml-platform"},
                "ownerReferences": [{
                    "apiVersion": "v1", "kind": "ConfigMap", "name": "quota-source", "uid": "u-1"
                }],
                "finalizers": ["throttle.io/keep"]
            },
            "spec": {
                "hard": {"limits.cpu": "100", "requests.cpu": "50"},
                "scopes": ["NotTerminating"],
                "scopeSelector": {"matchExpressions": [
                    {"operator": "In", "scopeName": "PriorityClass", "values": ["high"]}
                ]}
            },
            "status": {
                "hard": {"limits.cpu": "100", "requests.cpu": "50"},
                "used": {"limits.cpu": "12500m", "requests.cpu": "3"}
            }
        })
    }

    async fn list_quotas(State(stored): State<Stored>) -> Json<Value> {
        let item = stored.lock().unwrap().clone();
        Json(json!({
            "apiVersion": "v1",
            "kind": "ResourceQuotaList",
            "metadata": {"resourceVersion": "7"},
            "items": [item]
        }))
    }

    async fn patch_quota(
        State(stored): State<Stored>,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        assert_eq!(headers["content-type"], "application/merge-patch+json");
        let patch: Value = serde_json::from_slice(&body).unwrap();
        let mut quota = stored.lock().unwrap();
        merge(&mut quota, &patch);
        Json(quota.clone())
    }

    async fn forbidden() -> impl IntoResponse {
        (
            StatusCode::FORBIDDEN,
            Json(json!({
                "apiVersion": "v1",
                "kind": "Status",
                "status": "Failure",
                "message": "nodes is forbidden",
                "reason": "Forbidden",
                "code": 403
            })),
        )
    }

    async fn serve(stored: Stored) -> ApiClusterClient {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let router = Router::new()
            .route(
                "/api/v1/namespaces/{ns}/resourcequotas",
                get(list_quotas),
            )
            .route(
                "/api/v1/namespaces/{ns}/resourcequotas/{name}",
                axum::routing::patch(patch_quota),
            )
            .route("/api/v1/nodes", get(forbidden))
            .route(
                "/apis/throttle.io/v1alpha1/namespaces/{ns}/gpuquotas/{name}",
                axum::routing::patch(patch_quota),
            )
            .with_state(stored);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = Config::new(format!("http://{}", addr).parse().unwrap());
        ApiClusterClient::new(Client::try_from(config).unwrap())
    }

    #[tokio::test]
    async fn lists_quotas_as_records() {
        let api = serve(Arc::new(Mutex::new(stored_quota()))).await;

        let quotas = api.list_quotas("team-a").await.unwrap();
        assert_eq!(quotas.len(), 1);
        assert_eq!(quotas[0].namespace(), "team-a");
        assert_eq!(quotas[0].metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(quotas[0].status_used("limits.cpu").unwrap().millis(), 12_500);
    }

    #[tokio::test]
    async fn update_keeps_scopes_and_metadata() {
        let stored: Stored = Arc::new(Mutex::new(stored_quota()));
        let api = serve(stored.clone()).await;

        let mut quota = api.list_quotas("team-a").await.unwrap().remove(0);
        quota
            .spec
            .hard
            .insert("limits.cpu".to_string(), "80".parse().unwrap());
        api.update_quota(&quota).await.unwrap();

        let after = stored.lock().unwrap().clone();
        assert_eq!(after["spec"]["hard"]["limits.cpu"], "80");
        assert_eq!(after["spec"]["hard"]["requests.cpu"], "50");
        assert_eq!(after["spec"]["scopes"], json!(["NotTerminating"]));
        assert_eq!(
            after["spec"]["scopeSelector"]["matchExpressions"][0]["scopeName"],
            "PriorityClass"
        );
        assert_eq!(after["metadata"]["annotations"]["owner"], "ml-platform");
        assert_eq!(after["metadata"]["ownerReferences"][0]["name"], "quota-source");
        assert_eq!(after["metadata"]["finalizers"], json!(["throttle.io/keep"]));
        assert_eq!(after["status"]["used"]["limits.cpu"], "12500m");
    }

    #[tokio::test]
    async fn gpu_quota_update_patches_only_hard_limits() {
        let stored: Stored = Arc::new(Mutex::new(json!({
            "apiVersion": "throttle.io/v1alpha1",
            "kind": "GpuQuota",
            "metadata": {
                "name": "gpu",
                "namespace": "team-a",
                "annotations": {"owner": "ml-platform"}
            },
            "spec": {
                "hard": {"limits.nvidia.com/gpu": "10", "requests.nvidia.com/gpu": "10"},
                "scopes": ["NotTerminating"]
            }
        })));
        let api = serve(stored.clone()).await;

        let mut quota = {
            let raw = stored.lock().unwrap().clone();
            let obj: DynamicObject = serde_json::from_value(raw).unwrap();
            convert::gpu_quota(&obj).unwrap()
        };
        for key in [GpuQuota::LIMIT_FIELD, GpuQuota::REQUEST_FIELD] {
            quota.spec.hard.insert(key.to_string(), "8".parse().unwrap());
        }
        api.update_gpu_quota(&quota).await.unwrap();

        let after = stored.lock().unwrap().clone();
        assert_eq!(after["spec"]["hard"]["limits.nvidia.com/gpu"], "8");
        assert_eq!(after["spec"]["hard"]["requests.nvidia.com/gpu"], "8");
        assert_eq!(after["spec"]["scopes"], json!(["NotTerminating"]));
        assert_eq!(after["metadata"]["annotations"]["owner"], "ml-platform");
    }

    #[tokio::test]
    async fn api_errors_carry_the_server_message() {
        let api = serve(Arc::new(Mutex::new(Value::Null))).await;
        let err = api.list_nodes().await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("failed to list nodes"), "{}", msg);
        assert!(msg.contains("nodes is forbidden"), "{}", msg);
    }

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: lab
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: lab
  context:
    cluster: lab
    user: ops
current-context: lab
users:
- name: ops
  user:
    token: not-a-real-token
"#;

    #[tokio::test]
    async fn master_overrides_kubeconfig_server() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();

        let plain = load_config(&ApiClusterConfig {
            kubeconfig: Some(file.path().to_path_buf()),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(plain.cluster_url.port_u16(), Some(6443));
        assert!(!plain.accept_invalid_certs);

        let overridden = load_config(&ApiClusterConfig {
            kubeconfig: Some(file.path().to_path_buf()),
            master: Some("https://10.0.0.1:8443".to_string()),
            insecure_skip_tls_verify: true,
        })
        .await
        .unwrap();
        assert_eq!(overridden.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(overridden.cluster_url.port_u16(), Some(8443));
        assert!(overridden.accept_invalid_certs);
    }

    #[tokio::test]
    async fn unreadable_kubeconfig_is_an_error() {
        let err = load_config(&ApiClusterConfig {
            kubeconfig: Some(PathBuf::from("/nonexistent/kubeconfig")),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kubeconfig"), "{}", err);
    }
}
