//! Deployment store
//!
//! Holds repositories, webhooks and deployments behind a single lock and
//! enforces the deployment state machine on every write. Optionally mirrors
//! its contents to a JSON snapshot so lookups survive restarts.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;
use crate::models::provider::ProviderKind;
use crate::models::repository::Repository;
use crate::models::webhook::Webhook;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    repositories: HashMap<String, Repository>,
    #[serde(default)]
    webhooks: HashMap<String, Webhook>,
    #[serde(default)]
    deployments: HashMap<String, Deployment>,
}

/// Filter for listing deployments
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub repository_id: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub limit: Option<usize>,
}

/// Final write of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub success: bool,
    pub url: Option<String>,
    pub custom_domain: Option<String>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

pub struct Store {
    state: RwLock<StoreState>,
    snapshot: Option<File>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshot: None,
        }
    }

    /// Open a store mirrored to `snapshot`, loading it when present
    pub async fn open(snapshot: File) -> Result<Self, ControlError> {
        let state = if snapshot.exists().await {
            let state: StoreState = snapshot.read_json().await?;
            info!(
                "Loaded store snapshot: {} repositories, {} deployments",
                state.repositories.len(),
                state.deployments.len()
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(snapshot),
        })
    }

    async fn persist(&self, state: &StoreState) {
        if let Some(file) = &self.snapshot {
            if let Err(e) = file.write_json(state).await {
                error!("Failed to write store snapshot: {}", e);
            }
        }
    }

    // ------------------------------ repositories ------------------------------ //

    pub async fn insert_repository(&self, repository: Repository) -> Result<Repository, ControlError> {
        let mut state = self.state.write().await;
        if state.repositories.values().any(|r| r.name == repository.name) {
            return Err(ControlError::ValidationError(format!(
                "Repository name already taken: {}",
                repository.name
            )));
        }
        state
            .repositories
            .insert(repository.id.clone(), repository.clone());
        self.persist(&state).await;
        Ok(repository)
    }

    /// Create `name` or update its metadata. The owner of an existing
    /// repository cannot change.
    pub async fn upsert_repository(
        &self,
        name: &str,
        owner: &str,
        private: bool,
        default_branch: Option<String>,
    ) -> Result<Repository, ControlError> {
        let mut state = self.state.write().await;
        let existing = state.repositories.values_mut().find(|r| r.name == name);

        let repository = match existing {
            Some(repository) => {
                if repository.owner != owner {
                    return Err(ControlError::PermissionDenied(format!(
                        "Repository {} is owned by {}",
                        name, repository.owner
                    )));
                }
                repository.private = private;
                if let Some(branch) = default_branch {
                    repository.default_branch = branch;
                }
                repository.clone()
            }
            None => {
                let mut repository = Repository::new(name, owner);
                repository.private = private;
                if let Some(branch) = default_branch {
                    repository.default_branch = branch;
                }
                state
                    .repositories
                    .insert(repository.id.clone(), repository.clone());
                info!("Registered repository {} for {}", name, owner);
                repository
            }
        };

        self.persist(&state).await;
        Ok(repository)
    }

    pub async fn repository_by_name(&self, name: &str) -> Option<Repository> {
        let state = self.state.read().await;
        state.repositories.values().find(|r| r.name == name).cloned()
    }

    pub async fn repository(&self, id: &str) -> Option<Repository> {
        self.state.read().await.repositories.get(id).cloned()
    }

    // -------------------------------- webhooks -------------------------------- //

    pub async fn insert_webhook(&self, webhook: Webhook) -> Result<Webhook, ControlError> {
        let mut state = self.state.write().await;
        if !state.repositories.contains_key(&webhook.repository_id) {
            return Err(ControlError::NotFound(format!(
                "Repository {}",
                webhook.repository_id
            )));
        }
        state.webhooks.insert(webhook.id.clone(), webhook.clone());
        self.persist(&state).await;
        Ok(webhook)
    }

    pub async fn webhook(&self, id: &str) -> Option<Webhook> {
        self.state.read().await.webhooks.get(id).cloned()
    }

    pub async fn webhooks_for(&self, repository_id: &str) -> Vec<Webhook> {
        let state = self.state.read().await;
        state
            .webhooks
            .values()
            .filter(|w| w.repository_id == repository_id)
            .cloned()
            .collect()
    }

    // ------------------------------- deployments ------------------------------ //

    pub async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment, ControlError> {
        let mut state = self.state.write().await;
        if !state.repositories.contains_key(&deployment.repository_id) {
            return Err(ControlError::NotFound(format!(
                "Repository {}",
                deployment.repository_id
            )));
        }
        state
            .deployments
            .insert(deployment.id.clone(), deployment.clone());
        self.persist(&state).await;
        debug!("Created deployment {} for {}", deployment.id, deployment.repository_name);
        Ok(deployment)
    }

    pub async fn deployment(&self, id: &str) -> Result<Deployment, ControlError> {
        self.state
            .read()
            .await
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))
    }

    /// Deployments matching `filter`, newest first
    pub async fn list_deployments(&self, filter: &DeploymentFilter) -> Vec<Deployment> {
        let state = self.state.read().await;
        let mut deployments: Vec<Deployment> = state
            .deployments
            .values()
            .filter(|d| {
                filter
                    .repository_id
                    .as_ref()
                    .is_none_or(|repo| &d.repository_id == repo)
            })
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();

        deployments.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            deployments.truncate(limit);
        }
        deployments
    }

    /// Apply `event`, appending `logs` in the same write
    pub async fn advance(
        &self,
        id: &str,
        event: DeploymentEvent,
        logs: &[String],
    ) -> Result<Deployment, ControlError> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;

        let next = transition(deployment.status, &event)?;
        for line in logs {
            deployment.append_log(line);
        }
        if let DeploymentEvent::Fail(reason) = &event {
            deployment.append_log(&format!("Deployment failed: {}", reason));
        }
        deployment.status = next;
        if next.is_terminal() {
            deployment.completed_at = Some(Utc::now());
        }

        let updated = deployment.clone();
        self.persist(&state).await;
        Ok(updated)
    }

    /// Append log lines to an active deployment
    pub async fn append_logs(&self, id: &str, logs: &[String]) -> Result<(), ControlError> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;
        if deployment.status.is_terminal() {
            return Err(ControlError::InvalidState(format!(
                "Deployment {} is already {}",
                id, deployment.status
            )));
        }
        for line in logs {
            deployment.append_log(line);
        }
        self.persist(&state).await;
        Ok(())
    }

    /// Record the provider chosen for a running deployment
    pub async fn set_provider(&self, id: &str, provider: ProviderKind) -> Result<(), ControlError> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;
        if deployment.status.is_terminal() {
            return Err(ControlError::InvalidState(format!(
                "Deployment {} is already {}",
                id, deployment.status
            )));
        }
        deployment.provider = Some(provider);
        self.persist(&state).await;
        Ok(())
    }

    /// Move to `success` or `failed`, backfilling logs, URL and domain
    pub async fn complete(&self, id: &str, completion: Completion) -> Result<Deployment, ControlError> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;

        let event = if completion.success {
            DeploymentEvent::Succeed
        } else {
            DeploymentEvent::Fail(completion.error.clone().unwrap_or_default())
        };
        let next = transition(deployment.status, &event)?;

        for line in &completion.logs {
            deployment.append_log(line);
        }
        if completion.success {
            deployment.url = completion.url;
            deployment.custom_domain = completion.custom_domain;
        }
        deployment.status = next;
        deployment.completed_at = Some(Utc::now());

        let updated = deployment.clone();
        self.persist(&state).await;
        Ok(updated)
    }

    /// Cancel an active deployment. In-flight external work is not stopped.
    pub async fn cancel(&self, id: &str, actor: &str) -> Result<Deployment, ControlError> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;

        if !deployment.status.is_cancellable() {
            return Err(ControlError::InvalidState(format!(
                "Deployment {} is already {} and cannot be cancelled",
                id, deployment.status
            )));
        }
        deployment.status = transition(deployment.status, &DeploymentEvent::Cancel)?;
        deployment.append_log(&format!("Deployment cancelled by {}", actor));
        deployment.completed_at = Some(Utc::now());

        let updated = deployment.clone();
        self.persist(&state).await;
        Ok(updated)
    }

    /// Most recent successful deployment with a URL
    pub async fn latest_successful(&self, repository_id: &str) -> Option<Deployment> {
        let state = self.state.read().await;
        state
            .deployments
            .values()
            .filter(|d| {
                d.repository_id == repository_id
                    && d.status == DeploymentStatus::Success
                    && d.url.is_some()
            })
            .max_by_key(|d| d.completed_at.unwrap_or(d.started_at))
            .cloned()
    }

    /// Authoritative subdomain lookup: repository by name joined to its
    /// latest live deployment
    pub async fn lookup(&self, name: &str) -> Option<(Repository, Deployment)> {
        // hosts arrive lowercased
        let repository = {
            let state = self.state.read().await;
            state
                .repositories
                .values()
                .find(|r| r.name.eq_ignore_ascii_case(name))
                .cloned()?
        };
        let deployment = self.latest_successful(&repository.id).await?;
        Some((repository, deployment))
    }
}
