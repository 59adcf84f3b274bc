//! Control-plane API models
//!
//! Shared by the origin server (which produces them) and the edge layer and
//! CLIs (which consume them).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Body of `POST /repos/{name}/deploy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Explicit provider override (`railway`, `fly`, `vercel`)
    #[serde(default)]
    pub provider: Option<String>,

    /// Commit to deploy; the default branch head when absent
    #[serde(default)]
    pub commit: Option<String>,

    /// Extra environment variables layered over the manifest's
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub custom_domain: Option<String>,

    /// Pre-extracted source tree (uploads) instead of a git checkout
    #[serde(default)]
    pub source_path: Option<String>,
}

/// Body of `POST /repos/{name}/push`, sent by the git server hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub commit: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub webhooks_scheduled: usize,
    pub deployment: Option<DeploymentResponse>,
}

/// A deployment as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub id: String,
    pub repository_id: String,
    pub repository_name: String,
    pub commit: String,
    pub provider: Option<String>,
    pub status: String,
    pub url: Option<String>,
    pub custom_domain: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLogsResponse {
    pub deployment_id: String,
    pub status: String,
    pub logs: Vec<String>,
}

/// Authoritative answer of `GET /lookup/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub name: String,
    pub url: String,
    pub deployment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatusResponse {
    pub provider: String,
    pub installed: bool,
    pub authenticated: bool,
    pub version: Option<String>,
}

/// Body of `PUT /repos/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRequest {
    pub owner: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryResponse {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub private: bool,
    pub default_branch: String,
}

/// Body of `POST /repos/{name}/webhooks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// Event names such as `push` or `deployment.succeeded`
    pub events: Vec<String>,
}

/// A webhook subscription; the secret itself is never returned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub has_secret: bool,
    pub secret_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookListResponse {
    pub webhooks: Vec<WebhookResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDeliveryResponse {
    pub success: bool,
    pub status_code: Option<u16>,
    pub delivery_id: String,
    pub error: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
