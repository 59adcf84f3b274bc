//! Deployment models

use api_models::{DeploymentLogsResponse, DeploymentResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::models::provider::ProviderKind;
use crate::models::repository::Repository;

/// One attempt to ship one commit of one repository to one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub repository_id: String,
    pub repository_name: String,
    pub commit: String,

    /// `None` until autodetection picks a provider
    pub provider: Option<ProviderKind>,

    pub status: DeploymentStatus,
    pub url: Option<String>,
    pub custom_domain: Option<String>,

    /// Append-only, newline-joined
    #[serde(default)]
    pub logs: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
}

impl Deployment {
    /// A fresh pending deployment
    pub fn new(
        repository: &Repository,
        commit: impl Into<String>,
        provider: Option<ProviderKind>,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository.id.clone(),
            repository_name: repository.name.clone(),
            commit: commit.into(),
            provider,
            status: DeploymentStatus::Pending,
            url: None,
            custom_domain: None,
            logs: String::new(),
            started_at: Utc::now(),
            completed_at: None,
            triggered_by: triggered_by.into(),
        }
    }

    /// A new pending record for the same repository, commit and provider
    pub fn retry_of(&self, triggered_by: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: self.repository_id.clone(),
            repository_name: self.repository_name.clone(),
            commit: self.commit.clone(),
            provider: self.provider,
            status: DeploymentStatus::Pending,
            url: None,
            custom_domain: None,
            logs: String::new(),
            started_at: Utc::now(),
            completed_at: None,
            triggered_by: triggered_by.into(),
        }
    }

    pub fn append_log(&mut self, line: &str) {
        if !self.logs.is_empty() {
            self.logs.push('\n');
        }
        self.logs.push_str(line);
    }

    pub fn log_lines(&self) -> Vec<String> {
        if self.logs.is_empty() {
            return Vec::new();
        }
        self.logs.lines().map(str::to_string).collect()
    }

    pub fn to_response(&self) -> DeploymentResponse {
        DeploymentResponse {
            id: self.id.clone(),
            repository_id: self.repository_id.clone(),
            repository_name: self.repository_name.clone(),
            commit: self.commit.clone(),
            provider: self.provider.map(|p| p.to_string()),
            status: self.status.to_string(),
            url: self.url.clone(),
            custom_domain: self.custom_domain.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            triggered_by: self.triggered_by.clone(),
        }
    }

    pub fn to_logs_response(&self) -> DeploymentLogsResponse {
        DeploymentLogsResponse {
            deployment_id: self.id.clone(),
            status: self.status.to_string(),
            logs: self.log_lines(),
        }
    }
}

/// Outcome of one pipeline run. The engine always returns one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployResult {
    pub deployment_id: String,
    pub success: bool,
    pub url: Option<String>,
    pub custom_domain: Option<String>,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub provider: Option<ProviderKind>,
}
