use pkg_cluster::ClusterClient;
use pkg_constants::resources::{CPU, LIMITS_CPU, REQUESTS_CPU};
use pkg_types::meta::ResourceList;
use pkg_types::node::Node;
use pkg_types::pod::{Container, Pod};
use pkg_types::quantity::Quantity;
use pkg_types::quota::ResourceQuota;

/// Effective CPU a pod asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodCpu {
    pub request: Quantity,
    pub limit: Quantity,
}

fn cpu_of(list: &ResourceList) -> Option<Quantity> {
    list.get(CPU).copied()
}

fn effective(containers: &[Container], init: &[Container], pick: fn(&Container) -> Option<Quantity>) -> Quantity {
    let regular: Quantity = containers.iter().filter_map(pick).sum();
    // Init containers run one at a time before the others start, so only
    // the largest one can coincide with nothing else.
    init.iter().filter_map(pick).fold(regular, Quantity::max)
}

/// CPU request and limit of a pod: the sum over its containers, or the
/// largest init container when that is bigger.
pub fn pod_cpu(pod: &Pod) -> PodCpu {
    let spec = &pod.spec;
    PodCpu {
        request: effective(&spec.containers, &spec.init_containers, |c| {
            cpu_of(&c.resources.requests)
        }),
        limit: effective(&spec.containers, &spec.init_containers, |c| {
            cpu_of(&c.resources.limits)
        }),
    }
}

/// Cluster-wide CPU occupancy, all derived from one [`ClusterSnapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionContext {
    /// Schedulable CPU of worker nodes.
    pub cluster_total: Quantity,
    /// Sum of pod CPU limits.
    pub cluster_used: Quantity,
    /// Sum of `limits.cpu` hard across every quota.
    pub quota_total: Quantity,
    /// Sum of `limits.cpu` used across every quota.
    pub quota_used: Quantity,
}

/// One namespace's CPU quota, per key. A key is `None` when no quota in the
/// namespace declares it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceCpuQuota {
    pub requests: Option<QuotaUse>,
    pub limits: Option<QuotaUse>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUse {
    pub hard: Quantity,
    pub used: Quantity,
}

impl QuotaUse {
    pub fn remaining(&self) -> Quantity {
        self.hard - self.used
    }
}

/// Nodes, pods and quotas read together for one admission decision.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub quotas: Vec<ResourceQuota>,
}

impl ClusterSnapshot {
    pub async fn capture(cluster: &dyn ClusterClient) -> anyhow::Result<Self> {
        let (nodes, pods, quotas) = tokio::try_join!(
            cluster.list_nodes(),
            cluster.list_pods(),
            cluster.list_all_quotas()
        )?;
        Ok(Self {
            nodes,
            pods,
            quotas,
        })
    }

    pub fn context(&self) -> AdmissionContext {
        let cluster_total = self
            .nodes
            .iter()
            .filter(|n| !n.is_control_plane())
            .map(Node::allocatable_cpu)
            .sum();
        let cluster_used = self.pods.iter().map(|p| pod_cpu(p).limit).sum();
        let quota_total = self
            .quotas
            .iter()
            .filter_map(|q| q.status_hard(LIMITS_CPU))
            .sum();
        let quota_used = self
            .quotas
            .iter()
            .filter_map(|q| q.status_used(LIMITS_CPU))
            .sum();
        AdmissionContext {
            cluster_total,
            cluster_used,
            quota_total,
            quota_used,
        }
    }

    pub fn namespace_quota(&self, namespace: &str) -> NamespaceCpuQuota {
        let in_ns: Vec<&ResourceQuota> = self
            .quotas
            .iter()
            .filter(|q| q.namespace() == namespace)
            .collect();
        let sum_key = |key: &str| -> Option<QuotaUse> {
            let hards: Vec<Quantity> = in_ns.iter().filter_map(|q| q.spec_hard(key)).collect();
            if hards.is_empty() {
                return None;
            }
            Some(QuotaUse {
                hard: hards.into_iter().sum(),
                used: in_ns.iter().filter_map(|q| q.status_used(key)).sum(),
            })
        };
        NamespaceCpuQuota {
            requests: sum_key(REQUESTS_CPU),
            limits: sum_key(LIMITS_CPU),
        }
    }
}
