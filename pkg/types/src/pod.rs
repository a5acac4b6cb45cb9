use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, ResourceList};

// --- Resource requirements ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

// --- Container spec ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

// --- Pod spec ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Run one at a time, to completion, before `containers` start.
    #[serde(default)]
    pub init_containers: Vec<Container>,
    #[serde(default)]
    pub node_name: Option<String>,
}

// --- Pod status ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: Option<PodStatus>,
}
