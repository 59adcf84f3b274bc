//! HTTP request handlers

use std::sync::Arc;

use api_models::{
    DeployRequest, DeploymentListResponse, HealthResponse, LookupResponse, ProviderStatusResponse,
    PushRequest, RepositoryRequest, VersionResponse, WebhookListResponse, WebhookRequest,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::ControlError;
use crate::models::deployment::Deployment;
use crate::models::repository::Repository;
use crate::models::webhook::{Webhook, WebhookEvent};
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::store::DeploymentFilter;
use crate::utils::version_info;
use crate::webhooks::ssrf::screen_url;

/// Identity of the caller, set by the fronting auth layer
pub const ACTOR_HEADER: &str = "x-shipyard-actor";

const MAX_LIST_LIMIT: usize = 100;

fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_actor(headers: &HeaderMap) -> Result<String, ControlError> {
    actor(headers).ok_or_else(|| ControlError::PermissionDenied(format!("Missing {} header", ACTOR_HEADER)))
}

/// Private repositories are reported as missing to other actors
async fn visible_repository(state: &ServerState, name: &str, actor: Option<&str>) -> Result<Repository, ControlError> {
    state
        .store
        .repository_by_name(name)
        .await
        .filter(|repo| repo.visible_to(actor))
        .ok_or_else(|| ControlError::NotFound(format!("Repository {}", name)))
}

async fn writable_repository(state: &ServerState, name: &str, actor: &str) -> Result<Repository, ControlError> {
    let repository = visible_repository(state, name, Some(actor)).await?;
    if !repository.writable_by(Some(actor)) {
        return Err(ControlError::PermissionDenied(format!(
            "{} may not modify repository {}",
            actor, name
        )));
    }
    Ok(repository)
}

async fn visible_deployment(
    state: &ServerState,
    id: &str,
    actor: Option<&str>,
) -> Result<(Deployment, Repository), ControlError> {
    let deployment = state.store.deployment(id).await?;
    let repository = state
        .store
        .repository(&deployment.repository_id)
        .await
        .filter(|repo| repo.visible_to(actor))
        .ok_or_else(|| ControlError::NotFound(format!("Deployment {}", id)))?;
    Ok((deployment, repository))
}

async fn writable_deployment(state: &ServerState, id: &str, actor: &str) -> Result<Deployment, ControlError> {
    let (deployment, repository) = visible_deployment(state, id, Some(actor)).await?;
    if !repository.writable_by(Some(actor)) {
        return Err(ControlError::PermissionDenied(format!(
            "{} may not modify deployments of {}",
            actor, repository.name
        )));
    }
    Ok(deployment)
}

// ================================ SERVICE ===================================== //

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Provider tooling snapshot
pub async fn providers_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let statuses: Vec<ProviderStatusResponse> = state
        .engine
        .registry()
        .statuses()
        .await
        .into_iter()
        .map(|s| ProviderStatusResponse {
            provider: s.provider.as_str().to_string(),
            installed: s.installed,
            authenticated: s.authenticated,
            version: s.version,
        })
        .collect();
    Json(statuses)
}

/// Authoritative subdomain lookup used by the edge
pub async fn lookup_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, deployment) = state
        .store
        .lookup(&name)
        .await
        .ok_or_else(|| ControlError::NotFound(format!("No live deployment for {}", name)))?;
    let url = deployment
        .url
        .ok_or_else(|| ControlError::NotFound(format!("No live deployment for {}", name)))?;

    Ok(Json(LookupResponse {
        name,
        url,
        deployment_id: deployment.id,
    }))
}

// ================================ DEPLOYMENTS ================================= //

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    let repository = writable_repository(&state, &name, &actor).await?;
    let deployment = state.engine.trigger(&repository, request, &actor).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment.to_response())))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub repo: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers);
    let repository_id = match &query.repo {
        Some(name) => Some(visible_repository(&state, name, actor.as_deref()).await?.id),
        None => None,
    };
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DeploymentStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT);

    let filter = DeploymentFilter {
        repository_id,
        status,
        limit: None,
    };
    let mut deployments = Vec::new();
    for deployment in state.store.list_deployments(&filter).await {
        if deployments.len() == limit {
            break;
        }
        let visible = state
            .store
            .repository(&deployment.repository_id)
            .await
            .is_some_and(|repo| repo.visible_to(actor.as_deref()));
        if visible {
            deployments.push(deployment.to_response());
        }
    }

    let total = deployments.len();
    Ok(Json(DeploymentListResponse { deployments, total }))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let (deployment, _) = visible_deployment(&state, &id, actor(&headers).as_deref()).await?;
    Ok(Json(deployment.to_response()))
}

pub async fn deployment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let (deployment, _) = visible_deployment(&state, &id, actor(&headers).as_deref()).await?;
    Ok(Json(deployment.to_logs_response()))
}

pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    writable_deployment(&state, &id, &actor).await?;
    let deployment = state.engine.cancel(&id, &actor).await?;
    Ok(Json(deployment.to_response()))
}

pub async fn retry_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    writable_deployment(&state, &id, &actor).await?;
    let deployment = state.engine.retry(&id, &actor).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment.to_response())))
}

/// Called by the git server after a push; the server has already
/// authorized the pusher
pub async fn push_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(push): Json<PushRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    let repository = visible_repository(&state, &name, Some(&actor)).await?;
    info!("Push to {}:{} at {} by {}", repository.name, push.branch, push.commit, actor);
    let response = state.engine.push(&repository, push, &actor).await?;
    Ok(Json(response))
}

// ================================ REPOSITORIES ================================ //

pub async fn put_repository_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RepositoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    if request.owner != actor {
        return Err(ControlError::PermissionDenied(format!(
            "{} may not register repositories for {}",
            actor, request.owner
        ))
        .into());
    }
    if name.is_empty() || name.contains(['/', '.']) || name.chars().any(char::is_whitespace) {
        return Err(ControlError::ValidationError(format!("Invalid repository name: {}", name)).into());
    }
    let default_branch = request.default_branch.filter(|b| !b.trim().is_empty());

    let repository = state
        .store
        .upsert_repository(&name, &request.owner, request.private, default_branch)
        .await?;
    Ok(Json(repository.to_response()))
}

pub async fn create_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<WebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    let repository = writable_repository(&state, &name, &actor).await?;

    screen_url(&request.url)?;
    let events = request
        .events
        .iter()
        .map(|e| e.parse::<WebhookEvent>())
        .collect::<Result<Vec<_>, _>>()?;
    if events.is_empty() {
        return Err(ControlError::ValidationError("A webhook needs at least one event".to_string()).into());
    }
    let secret = request.secret.filter(|s| !s.is_empty());

    let webhook = state
        .store
        .insert_webhook(Webhook::new(&repository.id, request.url, secret, events))
        .await?;
    info!("Registered webhook {} for {}", webhook.id, repository.name);
    Ok((StatusCode::CREATED, Json(webhook.to_response())))
}

pub async fn list_webhooks_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    let repository = writable_repository(&state, &name, &actor).await?;
    let webhooks = state
        .store
        .webhooks_for(&repository.id)
        .await
        .iter()
        .map(Webhook::to_response)
        .collect();
    Ok(Json(WebhookListResponse { webhooks }))
}

pub async fn test_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_actor(&headers)?;
    let repository = writable_repository(&state, &name, &actor).await?;
    let belongs = state
        .store
        .webhook(&id)
        .await
        .is_some_and(|hook| hook.repository_id == repository.id);
    if !belongs {
        return Err(ControlError::NotFound(format!("Webhook {}", id)).into());
    }

    let report = state.dispatcher.test_delivery(&id).await?;
    Ok(Json(report))
}
