//! Repository model

use api_models::RepositoryResponse;
use serde::{Deserialize, Serialize};

/// A named, owned unit of code. Created by the repository service; the
/// control plane only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,

    /// Globally unique and immutable
    pub name: String,

    pub owner: String,

    #[serde(default)]
    pub private: bool,

    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Repository {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            owner: owner.into(),
            private: false,
            default_branch: default_branch(),
        }
    }

    pub fn to_response(&self) -> RepositoryResponse {
        RepositoryResponse {
            id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            private: self.private,
            default_branch: self.default_branch.clone(),
        }
    }

    /// Whether `actor` may see this repository and its deployments
    pub fn visible_to(&self, actor: Option<&str>) -> bool {
        !self.private || actor == Some(self.owner.as_str())
    }

    /// Whether `actor` may deploy, cancel, retry or test hooks
    pub fn writable_by(&self, actor: Option<&str>) -> bool {
        actor == Some(self.owner.as_str())
    }
}
