use anyhow::{Context, bail};
use async_trait::async_trait;
use pkg_types::directory::DirectoryGroup;
use tracing::debug;

/// Resolves the people who own a namespace.
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// Email addresses of the namespace's owners. Members without an email
    /// are left out.
    async fn owners(&self, namespace: &str) -> anyhow::Result<Vec<String>>;
}

/// Directory service answering `GET {base}/{namespace}` with a group record.
#[derive(Clone)]
pub struct HttpDirectory {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl OwnerDirectory for HttpDirectory {
    async fn owners(&self, namespace: &str) -> anyhow::Result<Vec<String>> {
        if namespace.is_empty() {
            bail!("cannot resolve owners of an unnamed namespace");
        }
        let url = format!("{}/{}", self.base_url, namespace);
        debug!("Resolving owners of {} via {}", namespace, url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("directory lookup for {} failed", namespace))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("directory lookup for {} returned {}", namespace, status);
        }
        let group: DirectoryGroup = resp
            .json()
            .await
            .with_context(|| format!("malformed directory group for {}", namespace))?;
        Ok(group.emails())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Path, routing::get};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn resolves_member_emails() {
        let router = Router::new().route(
            "/groups/{ns}",
            get(|Path(ns): Path<String>| async move {
                Json(serde_json::json!({
                    "id": 7,
                    "name": ns,
                    "members": [
                        {"username": "ann", "pk": 1, "email": "ann@example.com"},
                        {"username": "bob", "pk": 2, "email": ""},
                        {"username": "cy", "pk": 3}
                    ]
                }))
            }),
        );
        let base = serve(router).await;
        let directory = HttpDirectory::new(&format!("{}/groups/", base), reqwest::Client::new());

        let owners = directory.owners("team-a").await.unwrap();
        assert_eq!(owners, vec!["ann@example.com".to_string()]);
    }

    #[tokio::test]
    async fn missing_group_is_an_error() {
        let base = serve(Router::new()).await;
        let directory = HttpDirectory::new(&base, reqwest::Client::new());
        assert!(directory.owners("team-a").await.is_err());
    }
}
