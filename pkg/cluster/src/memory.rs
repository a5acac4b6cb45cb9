use anyhow::bail;
use async_trait::async_trait;
use pkg_types::meta::ObjectMeta;
use pkg_types::namespace::Namespace;
use pkg_types::node::Node;
use pkg_types::pod::Pod;
use pkg_types::quota::{GpuQuota, ResourceQuota};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::ClusterClient;

#[derive(Default)]
struct State {
    namespaces: Vec<Namespace>,
    quotas: Vec<ResourceQuota>,
    gpu_quotas: Vec<GpuQuota>,
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    rejected_updates: HashSet<(String, String)>,
    updates: usize,
}

/// In-process cluster used as a test double.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state.lock().unwrap().namespaces.push(Namespace {
            metadata: ObjectMeta::named("", name),
        });
        self
    }

    pub fn with_quota(self, quota: ResourceQuota) -> Self {
        self.state.lock().unwrap().quotas.push(quota);
        self
    }

    pub fn with_gpu_quota(self, quota: GpuQuota) -> Self {
        self.state.lock().unwrap().gpu_quotas.push(quota);
        self
    }

    pub fn with_node(self, node: Node) -> Self {
        self.state.lock().unwrap().nodes.push(node);
        self
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        self.state.lock().unwrap().pods.push(pod);
        self
    }

    /// Make every write to `namespace/name` fail.
    pub fn reject_updates_to(self, namespace: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_updates
            .insert((namespace.to_string(), name.to_string()));
        self
    }

    /// Number of successful writes so far.
    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub fn quota(&self, namespace: &str, name: &str) -> Option<ResourceQuota> {
        self.state
            .lock()
            .unwrap()
            .quotas
            .iter()
            .find(|q| q.namespace() == namespace && q.name() == name)
            .cloned()
    }

    pub fn gpu_quota(&self, namespace: &str, name: &str) -> Option<GpuQuota> {
        self.state
            .lock()
            .unwrap()
            .gpu_quotas
            .iter()
            .find(|q| q.namespace() == namespace && q.name() == name)
            .cloned()
    }
}

impl State {
    fn check_writable(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        if self
            .rejected_updates
            .contains(&(namespace.to_string(), name.to_string()))
        {
            bail!("update of {}/{} rejected", namespace, name);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        Ok(self.state.lock().unwrap().namespaces.clone())
    }

    async fn list_quotas(&self, namespace: &str) -> anyhow::Result<Vec<ResourceQuota>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .quotas
            .iter()
            .filter(|q| q.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn list_all_quotas(&self) -> anyhow::Result<Vec<ResourceQuota>> {
        Ok(self.state.lock().unwrap().quotas.clone())
    }

    async fn update_quota(&self, quota: &ResourceQuota) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_writable(quota.namespace(), quota.name())?;
        let Some(slot) = state
            .quotas
            .iter_mut()
            .find(|q| q.namespace() == quota.namespace() && q.name() == quota.name())
        else {
            bail!("quota {}/{} not found", quota.namespace(), quota.name());
        };
        *slot = quota.clone();
        state.updates += 1;
        Ok(())
    }

    async fn list_gpu_quotas(&self, namespace: &str) -> anyhow::Result<Vec<GpuQuota>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .gpu_quotas
            .iter()
            .filter(|q| q.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn update_gpu_quota(&self, quota: &GpuQuota) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check_writable(quota.namespace(), quota.name())?;
        let Some(slot) = state
            .gpu_quotas
            .iter_mut()
            .find(|q| q.namespace() == quota.namespace() && q.name() == quota.name())
        else {
            bail!("gpu quota {}/{} not found", quota.namespace(), quota.name());
        };
        *slot = quota.clone();
        state.updates += 1;
        Ok(())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        Ok(self.state.lock().unwrap().pods.clone())
    }
}
