//! Cluster-API collaborator.
//!
//! The controller and the webhook only see [`ClusterClient`]: semantic
//! records in, semantic records out.

pub mod client;
pub mod convert;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use async_trait::async_trait;
use pkg_types::namespace::Namespace;
use pkg_types::node::Node;
use pkg_types::pod::Pod;
use pkg_types::quota::{GpuQuota, ResourceQuota};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>>;

    /// Quotas of one namespace.
    async fn list_quotas(&self, namespace: &str) -> anyhow::Result<Vec<ResourceQuota>>;

    /// Quotas of every namespace.
    async fn list_all_quotas(&self) -> anyhow::Result<Vec<ResourceQuota>>;

    async fn update_quota(&self, quota: &ResourceQuota) -> anyhow::Result<()>;

    /// Legacy dedicated GPU quotas of one namespace.
    async fn list_gpu_quotas(&self, namespace: &str) -> anyhow::Result<Vec<GpuQuota>>;

    async fn update_gpu_quota(&self, quota: &GpuQuota) -> anyhow::Result<()>;

    async fn list_nodes(&self) -> anyhow::Result<Vec<Node>>;

    /// Pods of every namespace.
    async fn list_pods(&self) -> anyhow::Result<Vec<Pod>>;
}

pub use client::{ApiClusterClient, ApiClusterConfig};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryCluster;
