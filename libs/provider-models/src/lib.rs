//! Provider API models
//!
//! Only the fields Shipyard reads are modelled; everything else in the
//! provider payloads is ignored.

use serde::{Deserialize, Serialize};

/// GraphQL request envelope
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest<V: Serialize> {
    pub query: &'static str,
    pub variables: V,
}

/// GraphQL response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

pub mod railway {
    use super::*;

    pub const DEPLOYMENT_QUERY: &str =
        "query deployment($id: String!) { deployment(id: $id) { id status staticUrl } }";

    pub const BUILD_LOGS_QUERY: &str = "query buildLogs($deploymentId: String!, $limit: Int) { \
         buildLogs(deploymentId: $deploymentId, limit: $limit) { message } }";

    #[derive(Debug, Clone, Serialize)]
    pub struct DeploymentVars {
        pub id: String,
    }

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BuildLogsVars {
        pub deployment_id: String,
        pub limit: u32,
    }

    /// Deployment status as reported by Railway
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum DeploymentStatus {
        Queued,
        Waiting,
        Initializing,
        Building,
        Deploying,
        Success,
        Failed,
        Crashed,
        Removed,
        Removing,
        Sleeping,
        Skipped,
        #[serde(other)]
        Unknown,
    }

    impl DeploymentStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                DeploymentStatus::Success
                    | DeploymentStatus::Failed
                    | DeploymentStatus::Crashed
                    | DeploymentStatus::Removed
            )
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Deployment {
        pub id: String,
        pub status: DeploymentStatus,
        pub static_url: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct DeploymentData {
        pub deployment: Deployment,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct LogLine {
        pub message: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BuildLogsData {
        pub build_logs: Vec<LogLine>,
    }
}

pub mod fly {
    use super::*;

    /// Subset of `flyctl status --json`
    #[derive(Debug, Clone, Deserialize)]
    pub struct AppStatus {
        #[serde(rename = "Name", alias = "name", default)]
        pub name: String,
        #[serde(rename = "Hostname", alias = "hostname", default)]
        pub hostname: Option<String>,
        #[serde(rename = "Deployed", alias = "deployed", default)]
        pub deployed: bool,
    }
}
