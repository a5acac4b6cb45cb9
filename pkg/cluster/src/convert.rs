//! Mapping between Kubernetes API objects and the semantic records the
//! controller and the webhook work with.

use anyhow::Context;
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as ApiQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as ApiObjectMeta;
use kube::api::DynamicObject;
use pkg_types::meta::{ObjectMeta, ResourceList};
use pkg_types::namespace::Namespace;
use pkg_types::node::{Node, NodeStatus};
use pkg_types::pod::{Container, Pod, PodSpec, PodStatus, ResourceRequirements};
use pkg_types::quota::{GpuQuota, ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus};
use serde_json::json;
use std::collections::BTreeMap;

fn meta(m: &ApiObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: m.name.clone().unwrap_or_default(),
        namespace: m.namespace.clone().unwrap_or_default(),
        labels: m.labels.clone().unwrap_or_default().into_iter().collect(),
        resource_version: m.resource_version.clone(),
        uid: m.uid.clone(),
    }
}

fn resource_list(list: Option<&BTreeMap<String, ApiQuantity>>) -> anyhow::Result<ResourceList> {
    list.into_iter()
        .flatten()
        .map(|(name, q)| {
            let parsed = q
                .0
                .parse()
                .with_context(|| format!("{} has invalid quantity '{}'", name, q.0))?;
            Ok((name.clone(), parsed))
        })
        .collect()
}

pub fn resource_quota(q: &core::ResourceQuota) -> anyhow::Result<ResourceQuota> {
    let hard = resource_list(q.spec.as_ref().and_then(|s| s.hard.as_ref()))?;
    let status = q
        .status
        .as_ref()
        .map(|s| -> anyhow::Result<ResourceQuotaStatus> {
            Ok(ResourceQuotaStatus {
                hard: s.hard.as_ref().map(|h| resource_list(Some(h))).transpose()?,
                used: s.used.as_ref().map(|u| resource_list(Some(u))).transpose()?,
            })
        })
        .transpose()?;
    Ok(ResourceQuota {
        metadata: meta(&q.metadata),
        spec: ResourceQuotaSpec { hard },
        status,
    })
}

pub fn namespace(ns: &core::Namespace) -> Namespace {
    Namespace {
        metadata: meta(&ns.metadata),
    }
}

pub fn node(n: &core::Node) -> anyhow::Result<Node> {
    let status = n.status.as_ref();
    Ok(Node {
        metadata: meta(&n.metadata),
        status: NodeStatus {
            capacity: resource_list(status.and_then(|s| s.capacity.as_ref()))?,
            allocatable: resource_list(status.and_then(|s| s.allocatable.as_ref()))?,
        },
    })
}

fn container(c: &core::Container) -> anyhow::Result<Container> {
    let resources = c.resources.as_ref();
    Ok(Container {
        name: c.name.clone(),
        image: c.image.clone().unwrap_or_default(),
        resources: ResourceRequirements {
            requests: resource_list(resources.and_then(|r| r.requests.as_ref()))?,
            limits: resource_list(resources.and_then(|r| r.limits.as_ref()))?,
        },
    })
}

pub fn pod(p: &core::Pod) -> anyhow::Result<Pod> {
    let spec = match &p.spec {
        Some(s) => PodSpec {
            containers: s.containers.iter().map(container).collect::<anyhow::Result<_>>()?,
            init_containers: s
                .init_containers
                .iter()
                .flatten()
                .map(container)
                .collect::<anyhow::Result<_>>()?,
            node_name: s.node_name.clone(),
        },
        None => PodSpec::default(),
    };
    Ok(Pod {
        metadata: meta(&p.metadata),
        spec,
        status: p.status.as_ref().map(|s| PodStatus {
            phase: s.phase.clone(),
        }),
    })
}

pub fn gpu_quota(obj: &DynamicObject) -> anyhow::Result<GpuQuota> {
    let spec: ResourceQuotaSpec = match obj.data.get("spec") {
        Some(spec) => serde_json::from_value(spec.clone()).context("malformed GpuQuota spec")?,
        None => ResourceQuotaSpec::default(),
    };
    let status: Option<ResourceQuotaStatus> = match obj.data.get("status") {
        Some(status) => {
            Some(serde_json::from_value(status.clone()).context("malformed GpuQuota status")?)
        }
        None => None,
    };
    Ok(GpuQuota {
        metadata: meta(&obj.metadata),
        spec,
        status,
    })
}

/// Merge patch that rewrites `spec.hard` and nothing else. The resource
/// version, when known, turns the write into a conditional one.
pub fn hard_limits_patch(metadata: &ObjectMeta, hard: &ResourceList) -> serde_json::Value {
    let hard: serde_json::Map<String, serde_json::Value> = hard
        .iter()
        .map(|(name, q)| (name.clone(), json!(q.to_string())))
        .collect();
    let mut patch = json!({ "spec": { "hard": hard } });
    if let Some(rv) = &metadata.resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_quota() -> core::ResourceQuota {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": {
                "name": "compute",
                "namespace": "team-a",
                "labels": {"whitelist": ""},
                "annotations": {"owner": "ml-platform"},
                "resourceVersion": "42"
            },
            "spec": {
                "hard": {"limits.cpu": "100", "limits.memory": "200Gi"},
                "scopes": ["NotTerminating"]
            },
            "status": {
                "hard": {"limits.cpu": "100", "limits.memory": "200Gi"},
                "used": {"limits.cpu": "12500m"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn quota_maps_limits_and_labels() {
        let q = resource_quota(&api_quota()).unwrap();
        assert_eq!(q.namespace(), "team-a");
        assert!(q.metadata.has_label("whitelist"));
        assert_eq!(q.spec_hard("limits.memory").unwrap().value(), 200 << 30);
        assert_eq!(q.status_used("limits.cpu").unwrap().millis(), 12_500);
        assert!(q.has_status());
    }

    #[test]
    fn invalid_quantity_is_an_error() {
        let mut raw = api_quota();
        raw.spec
            .as_mut()
            .unwrap()
            .hard
            .as_mut()
            .unwrap()
            .insert("limits.cpu".to_string(), ApiQuantity("lots".to_string()));
        let err = resource_quota(&raw).unwrap_err();
        assert!(err.to_string().contains("limits.cpu"), "{}", err);
    }

    #[test]
    fn patch_carries_only_hard_limits_and_version() {
        let mut q = resource_quota(&api_quota()).unwrap();
        q.spec
            .hard
            .insert("limits.cpu".to_string(), "80".parse().unwrap());
        let patch = hard_limits_patch(&q.metadata, &q.spec.hard);
        assert_eq!(
            patch,
            json!({
                "metadata": {"resourceVersion": "42"},
                "spec": {"hard": {"limits.cpu": "80", "limits.memory": (200u64 << 30).to_string()}}
            })
        );
    }

    #[test]
    fn pod_init_containers_are_kept() {
        let raw: core::Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p", "namespace": "team-a"},
            "spec": {
                "containers": [{"name": "c", "resources": {"limits": {"cpu": "2"}}}],
                "initContainers": [{"name": "i", "resources": {"requests": {"cpu": "500m"}}}]
            },
            "status": {"phase": "Running"}
        }))
        .unwrap();
        let p = pod(&raw).unwrap();
        assert_eq!(p.spec.containers[0].resources.limits["cpu"].value(), 2);
        assert_eq!(p.spec.init_containers[0].resources.requests["cpu"].millis(), 500);
        assert_eq!(p.status.unwrap().phase.as_deref(), Some("Running"));
    }
}
