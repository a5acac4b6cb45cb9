use pkg_constants::resources::{CONTROL_PLANE_LABELS, CPU};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, ResourceList};
use crate::quantity::Quantity;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeStatus {
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocatable: ResourceList,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn is_control_plane(&self) -> bool {
        CONTROL_PLANE_LABELS
            .iter()
            .any(|label| self.metadata.has_label(label))
    }

    /// Schedulable CPU: allocatable when reported, capacity otherwise.
    pub fn allocatable_cpu(&self) -> Quantity {
        self.status
            .allocatable
            .get(CPU)
            .or_else(|| self.status.capacity.get(CPU))
            .copied()
            .unwrap_or_default()
    }
}
