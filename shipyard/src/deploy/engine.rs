//! Deployment engine
//!
//! Turns a trigger into a pending record, then runs the pipeline as a
//! supervised background task: source, manifest, provider, build, deploy.
//! Every outcome is written back to the store and returned as a
//! [`DeployResult`]; the engine never fails across its public boundary once
//! a record exists.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use api_models::{DeployRequest, PushRequest, PushResponse};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::deploy::builder::BuildHelper;
use crate::deploy::fsm::{DeploymentEvent, DeploymentStatus};
use crate::deploy::locks::RepoLocks;
use crate::deploy::source::SourceCheckout;
use crate::deploy::supervisor::TaskSet;
use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{DeployResult, Deployment};
use crate::models::manifest::Manifest;
use crate::models::provider::ProviderKind;
use crate::models::repository::Repository;
use crate::models::webhook::WebhookEvent;
use crate::providers::{DeployOptions, ProviderDeployResult, ProviderRegistry};
use crate::store::{Completion, Store};
use crate::webhooks::Notifier;

const MAX_APP_NAME: usize = 63;

/// Build output is flushed to the record in batches of this many lines
const LOG_FLUSH_LINES: usize = 20;

/// Lowercase DNS label: `[a-z0-9-]`, no runs of `-`, no leading or
/// trailing `-`, at most 63 characters. Never empty.
pub fn sanitize_app_name(name: &str) -> String {
    let mut label = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (label.is_empty() || label.ends_with('-')) {
            continue;
        }
        label.push(c);
    }

    let truncated: String = label.chars().take(MAX_APP_NAME).collect();
    let trimmed = truncated.trim_matches('-');
    if trimmed.is_empty() {
        "app".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Caller-supplied parts of a run that are not stored on the record
#[derive(Debug, Clone, Default)]
pub struct DeployPlan {
    /// Explicit provider override
    pub provider: Option<ProviderKind>,
    pub env: BTreeMap<String, String>,
    pub custom_domain: Option<String>,

    /// Pre-extracted source tree; a git checkout of the commit otherwise
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Deploy on pushes to the default branch
    pub auto_deploy: bool,

    /// Caller-supplied source paths must resolve under this directory.
    /// When unset, triggers carrying a source path are refused.
    pub uploads_root: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auto_deploy: true,
            uploads_root: None,
        }
    }
}

/// Canonical form of `path` where it exists; missing trailing components
/// are appended to the canonical form of the deepest existing ancestor
async fn resolve_lenient(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(resolved) = tokio::fs::canonicalize(current).await {
            return missing.iter().rev().fold(resolved, |acc, part| acc.join(part));
        }
        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Log lines of one run: everything for the result, plus the part not yet
/// written to the record
struct RunLog {
    deployment_id: String,
    all: Vec<String>,
    unflushed: Vec<String>,
}

impl RunLog {
    fn new(deployment_id: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            all: Vec::new(),
            unflushed: Vec::new(),
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!("[{}] {}", self.deployment_id, line);
        self.all.push(line.clone());
        self.unflushed.push(line);
    }

    fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.unflushed)
    }

    async fn flush(&mut self, store: &Store) -> Result<(), ControlError> {
        if self.unflushed.is_empty() {
            return Ok(());
        }
        let lines = self.take();
        store.append_logs(&self.deployment_id, &lines).await
    }

    async fn advance(&mut self, store: &Store, event: DeploymentEvent) -> Result<(), ControlError> {
        let lines = self.take();
        store.advance(&self.deployment_id, event, &lines).await?;
        Ok(())
    }
}

/// Resources a run creates and must release whatever happens
#[derive(Default)]
struct Leftovers {
    checkout: Option<Dir>,
    image: Option<String>,
}

pub struct Engine {
    store: Arc<Store>,
    registry: Arc<ProviderRegistry>,
    builder: BuildHelper,
    source: Option<SourceCheckout>,
    notifier: Arc<dyn Notifier>,
    tasks: Arc<TaskSet>,
    locks: RepoLocks,
    options: Options,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ProviderRegistry>,
        builder: BuildHelper,
        source: Option<SourceCheckout>,
        notifier: Arc<dyn Notifier>,
        tasks: Arc<TaskSet>,
        options: Options,
    ) -> Self {
        Self {
            store,
            registry,
            builder,
            source,
            notifier,
            tasks,
            locks: RepoLocks::new(),
            options,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    // ================================ TRIGGERS ==================================== //

    /// Create a pending deployment and start its pipeline in the background.
    /// Returns the pending record.
    pub async fn trigger(
        self: &Arc<Self>,
        repository: &Repository,
        request: DeployRequest,
        actor: &str,
    ) -> Result<Deployment, ControlError> {
        let provider = request
            .provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(str::parse::<ProviderKind>)
            .transpose()?;

        let source_path = match request.source_path.as_deref() {
            Some(path) => Some(self.confine_upload(path).await?),
            None => None,
        };

        let commit = match (request.commit, &source_path) {
            (Some(commit), _) if !commit.trim().is_empty() => commit.trim().to_string(),
            (_, Some(_)) => String::new(),
            (_, None) => self.resolve_head(repository).await?,
        };

        let plan = DeployPlan {
            provider,
            env: request.env.into_iter().collect(),
            custom_domain: request.custom_domain.filter(|d| !d.trim().is_empty()),
            source_path,
        };

        let deployment = self
            .store
            .create_deployment(Deployment::new(repository, commit, provider, actor))
            .await?;
        info!(
            "Deployment {} created for {}@{} by {}",
            deployment.id, repository.name, deployment.commit, actor
        );

        self.spawn(deployment.clone(), repository.clone(), plan).await;
        Ok(deployment)
    }

    /// Re-run a failed deployment as a new record. The original is untouched.
    pub async fn retry(self: &Arc<Self>, deployment_id: &str, actor: &str) -> Result<Deployment, ControlError> {
        let original = self.store.deployment(deployment_id).await?;
        if original.status != DeploymentStatus::Failed {
            return Err(ControlError::InvalidState(format!(
                "Only failed deployments can be retried; {} is {}",
                original.id, original.status
            )));
        }
        let repository = self
            .store
            .repository(&original.repository_id)
            .await
            .ok_or_else(|| ControlError::NotFound(format!("Repository {}", original.repository_id)))?;

        let deployment = self.store.create_deployment(original.retry_of(actor)).await?;
        info!("Deployment {} retries {}", deployment.id, original.id);

        let plan = DeployPlan {
            provider: original.provider,
            ..Default::default()
        };
        self.spawn(deployment.clone(), repository, plan).await;
        Ok(deployment)
    }

    /// Flip an active deployment to `failed`. Work already handed to a
    /// provider keeps running.
    pub async fn cancel(&self, deployment_id: &str, actor: &str) -> Result<Deployment, ControlError> {
        let deployment = self.store.cancel(deployment_id, actor).await?;
        info!("Deployment {} cancelled by {}", deployment.id, actor);

        if let Some(repository) = self.store.repository(&deployment.repository_id).await {
            self.notifier
                .notify(
                    &repository,
                    WebhookEvent::DeploymentFailed,
                    serde_json::json!({
                        "deployment_id": deployment.id,
                        "commit": deployment.commit,
                        "error": format!("Cancelled by {}", actor),
                    }),
                )
                .await;
        }
        Ok(deployment)
    }

    /// Handle a push from the git server: notify subscribers, then deploy
    /// when the default branch moved and auto-deploy is on
    pub async fn push(
        self: &Arc<Self>,
        repository: &Repository,
        push: PushRequest,
        actor: &str,
    ) -> Result<PushResponse, ControlError> {
        let webhooks_scheduled = self
            .notifier
            .notify(
                repository,
                WebhookEvent::Push,
                serde_json::json!({ "commit": push.commit, "branch": push.branch, "pusher": actor }),
            )
            .await;

        let deployment = if self.options.auto_deploy && push.branch == repository.default_branch {
            let request = DeployRequest {
                commit: Some(push.commit),
                ..Default::default()
            };
            Some(self.trigger(repository, request, actor).await?.to_response())
        } else {
            debug!("Push to {}:{} does not deploy", repository.name, push.branch);
            None
        };

        Ok(PushResponse {
            webhooks_scheduled,
            deployment,
        })
    }

    /// Resolve a caller-supplied source path, following symlinks, and
    /// require it to stay under the uploads root
    async fn confine_upload(&self, path: &str) -> Result<PathBuf, ControlError> {
        let root = self.options.uploads_root.as_ref().ok_or_else(|| {
            ControlError::PermissionDenied("Source paths are not accepted: uploads_root is not configured".to_string())
        })?;

        let requested = Path::new(path.trim());
        if !requested.is_absolute() || requested.components().any(|c| c == Component::ParentDir) {
            return Err(ControlError::ValidationError(format!(
                "Source path {} must be absolute and must not contain '..'",
                path
            )));
        }

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ControlError::ConfigError(format!("uploads_root {}: {}", root.display(), e)))?;
        let resolved = resolve_lenient(requested).await;
        if resolved == root || !resolved.starts_with(&root) {
            warn!("Refusing source path {} outside {}", path, root.display());
            return Err(ControlError::PermissionDenied(format!(
                "Source path {} is outside the uploads directory",
                path
            )));
        }
        Ok(resolved)
    }

    async fn resolve_head(&self, repository: &Repository) -> Result<String, ControlError> {
        match &self.source {
            Some(source) => source.resolve_commit(repository).await,
            None => Err(ControlError::ConfigError(
                "No commit given and repos_root is not configured".to_string(),
            )),
        }
    }

    async fn spawn(self: &Arc<Self>, deployment: Deployment, repository: Repository, plan: DeployPlan) {
        self.notifier
            .notify(
                &repository,
                WebhookEvent::DeploymentCreated,
                serde_json::json!({
                    "deployment_id": deployment.id,
                    "commit": deployment.commit,
                    "triggered_by": deployment.triggered_by,
                }),
            )
            .await;

        let engine = self.clone();
        self.tasks.spawn("deployment", async move {
            let result = engine.execute(&deployment, &repository, plan).await;
            debug!(
                "Deployment {} finished (success: {})",
                result.deployment_id, result.success
            );
        });
    }

    // ================================ PIPELINE ==================================== //

    /// Run the pipeline for a pending deployment and record the outcome.
    /// Runs of the same repository are serialized.
    pub async fn execute(&self, deployment: &Deployment, repository: &Repository, plan: DeployPlan) -> DeployResult {
        let _guard = self.locks.acquire(&repository.id).await;

        // the record may have been cancelled while waiting for the lock
        let current = match self.store.deployment(&deployment.id).await {
            Ok(current) if !current.status.is_terminal() => Ok(current),
            Ok(current) => Err(format!("Deployment is already {}", current.status)),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = current {
            info!("Skipping deployment {}: {}", deployment.id, error);
            return DeployResult {
                deployment_id: deployment.id.clone(),
                success: false,
                url: None,
                custom_domain: None,
                error: Some(error),
                logs: Vec::new(),
                provider: deployment.provider,
            };
        }

        let mut log = RunLog::new(&deployment.id);
        let mut leftovers = Leftovers::default();
        let mut provider = deployment.provider;

        let outcome = self
            .run(deployment, repository, &plan, &mut log, &mut leftovers, &mut provider)
            .await;

        if let Some(image) = &leftovers.image {
            self.builder.remove_image(image).await;
        }
        if let Some(checkout) = &leftovers.checkout {
            SourceCheckout::cleanup(checkout).await;
        }

        self.finish(deployment, repository, outcome, log, provider).await
    }

    async fn run(
        &self,
        deployment: &Deployment,
        repository: &Repository,
        plan: &DeployPlan,
        log: &mut RunLog,
        leftovers: &mut Leftovers,
        provider: &mut Option<ProviderKind>,
    ) -> Result<ProviderDeployResult, ControlError> {
        // 1. source tree
        let source_path = match &plan.source_path {
            Some(path) => {
                if !Dir::new(path).exists().await {
                    return Err(ControlError::NotFound(format!("Source path {}", path.display())));
                }
                path.clone()
            }
            None => {
                let source = self.source.as_ref().ok_or_else(|| {
                    ControlError::ConfigError("repos_root is not configured".to_string())
                })?;
                if deployment.commit.is_empty() {
                    return Err(ControlError::NotFound("No commit to deploy".to_string()));
                }
                let checkout = source.checkout(repository, &deployment.commit).await?;
                let path = checkout.path().to_path_buf();
                leftovers.checkout = Some(checkout);
                log.push(format!("Checked out {}@{}", repository.name, deployment.commit));
                path
            }
        };

        // 2. manifest
        let manifest = match Manifest::load(&source_path).await {
            Some((manifest, path)) => {
                log.push(format!(
                    "Using manifest {}",
                    path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                ));
                Some(manifest)
            }
            None => {
                log.push("No deployment manifest found, using defaults");
                None
            }
        };

        // 3. provider
        let explicit = plan.provider.map(|p| p.as_str());
        let adapter = self.registry.resolve(explicit, manifest.as_ref()).await?;
        *provider = Some(adapter.kind());
        self.store.set_provider(&deployment.id, adapter.kind()).await?;
        log.push(format!("Provider: {}", adapter.kind()));

        // 4. application name
        let app_name = sanitize_app_name(
            manifest
                .as_ref()
                .and_then(|m| m.name.as_deref())
                .unwrap_or(&repository.name),
        );
        log.push(format!("Application: {}", app_name));

        // 5. local build
        let local_image = self
            .build(deployment, &source_path, &app_name, log, leftovers)
            .await?;

        // 6. custom domain
        let custom_domain = plan
            .custom_domain
            .clone()
            .or_else(|| manifest.as_ref().and_then(|m| m.domain()).map(str::to_string));

        // 7. deploy
        let options = DeployOptions {
            deployment_id: deployment.id.clone(),
            source_path,
            app_name: app_name.clone(),
            env: merge_env(manifest.as_ref(), &plan.env),
            region: manifest.as_ref().and_then(|m| m.deploy.region.clone()),
            manifest,
            custom_domain,
            local_image,
        };

        log.push(format!("Deploying {} to {}", app_name, adapter.kind()));
        log.advance(&self.store, DeploymentEvent::Deploy).await?;

        let result = adapter.deploy(&options).await?;

        // 8. adapter logs
        for line in &result.logs {
            log.push(line.clone());
        }
        Ok(result)
    }

    /// Build the local image when the tree carries a build descriptor and
    /// the builder is reachable. Returns the image name when built.
    async fn build(
        &self,
        deployment: &Deployment,
        source_path: &Path,
        app_name: &str,
        log: &mut RunLog,
        leftovers: &mut Leftovers,
    ) -> Result<Option<String>, ControlError> {
        if !BuildHelper::has_descriptor(source_path).await {
            return Ok(None);
        }
        if !self.builder.is_available().await {
            log.push("Docker is not available, the provider will build from source");
            return Ok(None);
        }

        let image = BuildHelper::image_name(app_name, &deployment.commit, &deployment.id);
        log.push(format!("Building image {}", image));
        log.advance(&self.store, DeploymentEvent::Build).await?;
        leftovers.image = Some(image.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = &self.store;
        let collect = async {
            while let Some(line) = rx.recv().await {
                log.push(line);
                if log.unflushed.len() >= LOG_FLUSH_LINES {
                    // a rejected write means the record was cancelled; the
                    // build still runs to completion
                    if let Err(e) = log.flush(store).await {
                        debug!("Dropping build log flush: {}", e);
                    }
                }
            }
        };
        let (built, ()) = tokio::join!(self.builder.build(source_path, &image, tx), collect);
        // the output was already streamed into the log
        built.map_err(|e| match e {
            ControlError::ProviderError { message, .. } => ControlError::ProviderError {
                message,
                stdout: String::new(),
                stderr: String::new(),
            },
            other => other,
        })?;

        log.push(format!("Built image {}", image));
        log.flush(&self.store).await?;
        Ok(Some(image))
    }

    /// Record the outcome, notify subscribers and assemble the result
    async fn finish(
        &self,
        deployment: &Deployment,
        repository: &Repository,
        outcome: Result<ProviderDeployResult, ControlError>,
        mut log: RunLog,
        provider: Option<ProviderKind>,
    ) -> DeployResult {
        let (success, url, custom_domain, error) = match outcome {
            Ok(result) if result.success => {
                if let Some(url) = &result.url {
                    log.push(format!("Deployed to {}", url));
                }
                if let Some(domain) = &result.custom_domain {
                    log.push(format!("Custom domain: {}", domain));
                }
                (true, result.url, result.custom_domain, None)
            }
            Ok(result) => {
                let error = result
                    .error
                    .unwrap_or_else(|| "Provider reported a failed deployment".to_string());
                (false, None, None, Some(error))
            }
            Err(e) => {
                if let ControlError::ProviderError { stdout, stderr, .. } = &e {
                    for line in stdout.lines().chain(stderr.lines()) {
                        log.push(line.to_string());
                    }
                }
                (false, None, None, Some(e.to_string()))
            }
        };

        if let Some(error) = &error {
            log.push(format!("Deployment failed: {}", error));
        }

        let completion = Completion {
            success,
            url: url.clone(),
            custom_domain: custom_domain.clone(),
            error: error.clone(),
            logs: log.take(),
        };

        let cancelled = match self.store.complete(&deployment.id, completion).await {
            Ok(_) => false,
            Err(ControlError::InvalidState(_)) => {
                info!("Deployment {} was cancelled while running", deployment.id);
                true
            }
            Err(e) => {
                error!("Failed to record outcome of deployment {}: {}", deployment.id, e);
                false
            }
        };

        if cancelled {
            return DeployResult {
                deployment_id: deployment.id.clone(),
                success: false,
                url: None,
                custom_domain: None,
                error: Some("Deployment was cancelled".to_string()),
                logs: log.all,
                provider,
            };
        }

        let (event, data) = if success {
            info!("Deployment {} succeeded: {}", deployment.id, url.as_deref().unwrap_or("-"));
            (
                WebhookEvent::DeploymentSucceeded,
                serde_json::json!({
                    "deployment_id": deployment.id,
                    "commit": deployment.commit,
                    "provider": provider,
                    "url": url,
                    "custom_domain": custom_domain,
                }),
            )
        } else {
            warn!(
                "Deployment {} failed: {}",
                deployment.id,
                error.as_deref().unwrap_or("-")
            );
            (
                WebhookEvent::DeploymentFailed,
                serde_json::json!({
                    "deployment_id": deployment.id,
                    "commit": deployment.commit,
                    "provider": provider,
                    "error": error,
                }),
            )
        };
        self.notifier.notify(repository, event, data).await;

        DeployResult {
            deployment_id: deployment.id.clone(),
            success,
            url,
            custom_domain,
            error,
            logs: log.all,
            provider,
        }
    }
}

/// Manifest env, then `PORT`, then the request's variables on top
fn merge_env(manifest: Option<&Manifest>, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    if let Some(manifest) = manifest {
        env.extend(manifest.deploy.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(port) = manifest.deploy.port {
            env.insert("PORT".to_string(), port.to_string());
        }
    }
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
