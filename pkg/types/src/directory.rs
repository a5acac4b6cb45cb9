use serde::{Deserialize, Serialize};

/// A member of a namespace's owner group in the user directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pk: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Owner group returned by the directory for one namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryGroup {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

impl DirectoryGroup {
    /// Member emails, skipping members without one.
    pub fn emails(&self) -> Vec<String> {
        self.members
            .iter()
            .filter_map(|m| m.email.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }
}
