//! Railway adapter
//!
//! Provisioning and deploys go through the `railway` CLI. When an API token
//! is available the deploy is detached and its progress is polled through
//! the GraphQL API; otherwise the CLI is run in CI mode and blocks until the
//! build finishes.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use provider_models::railway::{
    BuildLogsData, BuildLogsVars, Deployment, DeploymentData, DeploymentStatus, DeploymentVars,
    BUILD_LOGS_QUERY, DEPLOYMENT_QUERY,
};
use provider_models::{GraphQlRequest, GraphQlResponse};
use regex::Regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::models::provider::{ProviderKind, ProviderStatus};
use crate::providers::output::{find_url, is_already_exists, lines};
use crate::providers::poll::{self, poll_until, PollOutcome};
use crate::providers::{
    ensure_usable, parse_version, DeployOptions, ProviderAdapter, ProviderDeployResult,
};
use crate::storage::settings::{ProviderSettings, Timeouts};

const URL_SUFFIX: &str = ".up.railway.app";
const BUILD_LOG_LIMIT: u32 = 200;

static DEPLOYMENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&]id=([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})")
        .expect("Invalid regex pattern")
});

/// Deployment id from the build-logs link printed by `railway up`
pub fn parse_deployment_id(output: &str) -> Option<String> {
    DEPLOYMENT_ID
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

// ================================ GRAPHQL API ==================================== //

/// Minimal client of Railway's public GraphQL API
pub struct RailwayApi {
    client: Client,
    url: String,
    token: SecretString,
}

impl RailwayApi {
    pub fn new(url: &str, token: SecretString) -> Result<Self, ControlError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }

    async fn query<V: Serialize, T: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: V,
    ) -> Result<T, ControlError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ControlError::provider(format!(
                "Railway API returned {}: {}",
                status, body
            )));
        }

        let body: GraphQlResponse<T> = response.json().await?;
        if let Some(error) = body.errors.first() {
            return Err(ControlError::provider(format!(
                "Railway API error: {}",
                error.message
            )));
        }
        body.data
            .ok_or_else(|| ControlError::provider("Railway API returned no data"))
    }

    pub async fn deployment(&self, id: &str) -> Result<Deployment, ControlError> {
        let data: DeploymentData = self
            .query(DEPLOYMENT_QUERY, DeploymentVars { id: id.to_string() })
            .await?;
        Ok(data.deployment)
    }

    pub async fn build_logs(&self, id: &str) -> Result<Vec<String>, ControlError> {
        let data: BuildLogsData = self
            .query(
                BUILD_LOGS_QUERY,
                BuildLogsVars {
                    deployment_id: id.to_string(),
                    limit: BUILD_LOG_LIMIT,
                },
            )
            .await?;
        Ok(data.build_logs.into_iter().map(|l| l.message).collect())
    }
}

// ================================== ADAPTER ====================================== //

pub struct RailwayAdapter {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    token: Option<SecretString>,
    api: Option<RailwayApi>,
    timeouts: Timeouts,
}

impl RailwayAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: &ProviderSettings,
        token: Option<SecretString>,
        api_token: Option<SecretString>,
        timeouts: Timeouts,
    ) -> Result<Self, ControlError> {
        let api = api_token
            .map(|token| RailwayApi::new(&settings.railway_api_url, token))
            .transpose()?;
        Ok(Self {
            runner,
            cli: settings.railway_cli.clone(),
            token,
            api,
            timeouts,
        })
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(&self.cli, args).timeout(self.timeouts.check);
        match &self.token {
            Some(token) => spec.env("RAILWAY_TOKEN", token.expose_secret()),
            None => spec,
        }
    }

    async fn write_config(&self, source: &Path, healthcheck: Option<&str>) -> Result<(), ControlError> {
        let Some(path) = healthcheck else {
            return Ok(());
        };
        let config = File::new(source.join("railway.json"));
        if config.exists().await || File::new(source.join("railway.toml")).exists().await {
            return Ok(());
        }
        debug!("Writing railway.json with health check {}", path);
        config
            .write_json(&serde_json::json!({
                "$schema": "https://railway.app/railway.schema.json",
                "deploy": { "healthcheckPath": path },
            }))
            .await
    }

    async fn provision(&self, options: &DeployOptions, logs: &mut Vec<String>) -> Result<(), ControlError> {
        let spec = self
            .command(["init", "--name", options.app_name.as_str()])
            .cwd(&options.source_path);
        let output = self.runner.run(&spec).await?;
        if output.success {
            logs.push(format!("Created Railway project {}", options.app_name));
        } else if is_already_exists(&output.combined()) {
            logs.push(format!("Railway project {} already exists", options.app_name));
        } else {
            return Err(output.into_provider_error("railway init failed"));
        }
        Ok(())
    }

    async fn set_variables(&self, options: &DeployOptions, logs: &mut Vec<String>) {
        for (key, value) in &options.env {
            let spec = self
                .command(["variables".to_string(), "--set".to_string(), format!("{}={}", key, value)])
                .cwd(&options.source_path);
            match self.runner.run(&spec).await {
                Ok(output) if output.success => logs.push(format!("Set variable {}", key)),
                Ok(output) => {
                    warn!("Failed to set Railway variable {}: {}", key, output.stderr);
                    logs.push(format!("Warning: failed to set variable {}", key));
                }
                Err(e) => {
                    warn!("Failed to set Railway variable {}: {}", key, e);
                    logs.push(format!("Warning: failed to set variable {}", key));
                }
            }
        }
    }

    async fn wait_for(&self, api: &RailwayApi, deployment_id: &str) -> PollOutcome<Deployment> {
        let options = poll::Options {
            interval: self.timeouts.poll_interval,
            max_wait: self.timeouts.poll_max_wait,
        };
        poll_until(
            &options,
            || async {
                let deployment = api.deployment(deployment_id).await?;
                debug!("Railway deployment {} is {:?}", deployment_id, deployment.status);
                Ok::<_, ControlError>(deployment.status.is_terminal().then_some(deployment))
            },
            tokio::time::sleep,
        )
        .await
    }

    async fn append_build_logs(&self, api: &RailwayApi, deployment_id: &str, logs: &mut Vec<String>) {
        match api.build_logs(deployment_id).await {
            Ok(build_logs) => logs.extend(build_logs),
            Err(e) => warn!("Failed to fetch Railway build logs: {}", e),
        }
    }

    async fn discover_url(&self, options: &DeployOptions, logs: &mut Vec<String>) -> Option<String> {
        let spec = self.command(["domain"]).cwd(&options.source_path);
        match self.runner.run(&spec).await {
            Ok(output) if output.success => {
                logs.extend(lines(&output.stdout));
                find_url(&output.combined(), URL_SUFFIX)
            }
            Ok(output) => {
                warn!("railway domain failed: {}", output.stderr);
                None
            }
            Err(e) => {
                warn!("railway domain failed: {}", e);
                None
            }
        }
    }

    async fn attach_domain(&self, options: &DeployOptions, domain: &str, logs: &mut Vec<String>) -> bool {
        let spec = self.command(["domain", domain]).cwd(&options.source_path);
        match self.runner.run(&spec).await {
            Ok(output) if output.success || is_already_exists(&output.combined()) => {
                logs.push(format!("Attached custom domain {}", domain));
                true
            }
            Ok(output) => {
                warn!("Failed to attach custom domain {}: {}", domain, output.stderr);
                logs.push(format!("Warning: failed to attach custom domain {}", domain));
                false
            }
            Err(e) => {
                warn!("Failed to attach custom domain {}: {}", domain, e);
                logs.push(format!("Warning: failed to attach custom domain {}", domain));
                false
            }
        }
    }

    async fn release(
        &self,
        options: &DeployOptions,
        logs: &mut Vec<String>,
    ) -> Result<ProviderDeployResult, ControlError> {
        self.write_config(&options.source_path, options.healthcheck()).await?;
        self.provision(options, logs).await?;
        self.set_variables(options, logs).await;

        let up_args: &[&str] = if self.api.is_some() {
            &["up", "--detach"]
        } else {
            &["up", "--ci"]
        };
        let spec = self
            .command(up_args.iter().copied())
            .cwd(&options.source_path)
            .timeout(self.timeouts.deploy);
        let output = self.runner.run(&spec).await?;
        logs.extend(lines(&output.combined()));
        if !output.success {
            return Err(ControlError::provider("railway up failed"));
        }

        let mut url = find_url(&output.combined(), URL_SUFFIX);

        if let (Some(api), Some(deployment_id)) = (&self.api, parse_deployment_id(&output.combined())) {
            logs.push(format!("Waiting for Railway deployment {}", deployment_id));
            match self.wait_for(api, &deployment_id).await {
                PollOutcome::Settled(deployment) if deployment.status == DeploymentStatus::Success => {
                    if let Some(static_url) = deployment.static_url.filter(|u| !u.is_empty()) {
                        url = Some(if static_url.starts_with("http") {
                            static_url
                        } else {
                            format!("https://{}", static_url)
                        });
                    }
                }
                PollOutcome::Settled(deployment) => {
                    self.append_build_logs(api, &deployment_id, logs).await;
                    return Ok(ProviderDeployResult::failed(
                        format!("Railway deployment ended with status {:?}", deployment.status),
                        std::mem::take(logs),
                    ));
                }
                PollOutcome::TimedOut => {
                    self.append_build_logs(api, &deployment_id, logs).await;
                    return Ok(ProviderDeployResult::failed(
                        format!(
                            "Railway deployment did not finish within {:?}",
                            self.timeouts.poll_max_wait
                        ),
                        std::mem::take(logs),
                    ));
                }
            }
        }

        if url.is_none() {
            url = self.discover_url(options, logs).await;
        }

        let mut result = ProviderDeployResult::succeeded(url, std::mem::take(logs));
        if let Some(domain) = &options.custom_domain {
            if self.attach_domain(options, domain, &mut result.logs).await {
                result.custom_domain = Some(domain.clone());
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl ProviderAdapter for RailwayAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Railway
    }

    async fn check_status(&self) -> ProviderStatus {
        let version = match self.runner.run(&self.command(["--version"])).await {
            Ok(output) if output.success => parse_version(&output.stdout),
            _ => return ProviderStatus::missing(ProviderKind::Railway),
        };

        let authenticated = matches!(
            self.runner.run(&self.command(["whoami"])).await,
            Ok(CommandOutput { success: true, .. })
        );

        ProviderStatus {
            provider: ProviderKind::Railway,
            installed: true,
            authenticated,
            version,
        }
    }

    async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError> {
        ensure_usable(&self.check_status().await)?;
        info!("Deploying {} to Railway", options.app_name);

        let mut logs = Vec::new();
        match self.release(options, &mut logs).await {
            Ok(result) => Ok(result),
            Err(e) => ProviderDeployResult::interrupted(e, logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::{routing::post, Json, Router};

    use super::*;
    use crate::deploy::command::fake::ScriptedRunner;

    fn options(source: &Path) -> DeployOptions {
        DeployOptions {
            deployment_id: "d1".into(),
            source_path: source.to_path_buf(),
            app_name: "shop".into(),
            manifest: None,
            env: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            custom_domain: None,
            region: None,
            local_image: None,
        }
    }

    fn usable_runner() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("railway --version", CommandOutput::ok("railway 3.17.1"))
            .on("railway whoami", CommandOutput::ok("Logged in as alice"));
        runner
    }

    #[test]
    fn test_parse_deployment_id() {
        let out = "Build Logs: https://railway.app/project/p/service/s?id=0B6A2C1E-1111-2222-3333-444455556666&";
        assert_eq!(
            parse_deployment_id(out).as_deref(),
            Some("0b6a2c1e-1111-2222-3333-444455556666")
        );
        assert_eq!(parse_deployment_id("no link"), None);
    }

    #[tokio::test]
    async fn test_not_installed_is_configuration_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.missing("railway");
        let adapter =
            RailwayAdapter::new(runner, &ProviderSettings::default(), None, None, Timeouts::default()).unwrap();

        assert_eq!(adapter.check_status().await, ProviderStatus::missing(ProviderKind::Railway));
        let dir = tempfile::tempdir().unwrap();
        let err = adapter.deploy(&options(dir.path())).await.unwrap_err();
        assert!(matches!(err, ControlError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_ci_deploy_with_existing_project_and_domain_fallback() {
        let runner = usable_runner();
        runner
            .on("railway init", CommandOutput::failed("Project name has already been taken"))
            .on("railway up --ci", CommandOutput::ok("Build complete\nDeploy complete"))
            .on("railway domain", CommandOutput::ok("Service Domain: https://shop-production.up.railway.app"));
        let adapter = RailwayAdapter::new(
            runner.clone(),
            &ProviderSettings::default(),
            None,
            None,
            Timeouts::default(),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let result = adapter.deploy(&options(dir.path())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.url.as_deref(), Some("https://shop-production.up.railway.app"));
        assert!(result.logs.iter().any(|l| l == "Set variable NODE_ENV"));
        assert!(!result.logs.iter().any(|l| l.contains("production\"")));
        assert!(runner
            .calls()
            .contains(&"railway variables --set NODE_ENV=production".to_string()));
    }

    #[tokio::test]
    async fn test_up_failure_keeps_provisioning_logs() {
        let runner = usable_runner();
        runner.on("railway up", CommandOutput::failed("Unauthorized project"));
        let adapter =
            RailwayAdapter::new(runner, &ProviderSettings::default(), None, None, Timeouts::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let result = adapter.deploy(&options(dir.path())).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Provider error: railway up failed"));
        assert_eq!(result.logs.first().map(String::as_str), Some("Created Railway project shop"));
        assert_eq!(result.logs.iter().filter(|l| *l == "Unauthorized project").count(), 1);
    }

    #[tokio::test]
    async fn test_init_failure_carries_cli_output() {
        let runner = usable_runner();
        runner.on("railway init", CommandOutput::failed("Workspace quota exceeded"));
        let adapter =
            RailwayAdapter::new(runner.clone(), &ProviderSettings::default(), None, None, Timeouts::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let result = adapter.deploy(&options(dir.path())).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.logs, vec!["Workspace quota exceeded".to_string()]);
        assert!(!runner.calls().iter().any(|c| c.starts_with("railway up")));
    }

    #[tokio::test]
    async fn test_custom_domain_failure_is_omitted() {
        let runner = usable_runner();
        runner
            .on("railway up", CommandOutput::ok("https://shop.up.railway.app"))
            .on("railway domain shop.example.org", CommandOutput::failed("domain invalid"));
        let adapter =
            RailwayAdapter::new(runner, &ProviderSettings::default(), None, None, Timeouts::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.custom_domain = Some("shop.example.org".into());
        let result = adapter.deploy(&opts).await.unwrap();

        assert!(result.success);
        assert_eq!(result.url.as_deref(), Some("https://shop.up.railway.app"));
        assert_eq!(result.custom_domain, None);
    }

    #[tokio::test]
    async fn test_healthcheck_writes_railway_json() {
        let runner = usable_runner();
        runner.on("railway up", CommandOutput::ok("https://shop.up.railway.app"));
        let adapter =
            RailwayAdapter::new(runner, &ProviderSettings::default(), None, None, Timeouts::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.manifest = Some(
            crate::models::manifest::Manifest::parse("shipyard.json", r#"{"deploy": {"healthcheck": "/healthz"}}"#)
                .unwrap(),
        );
        adapter.deploy(&opts).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("railway.json")).unwrap()).unwrap();
        assert_eq!(written["deploy"]["healthcheckPath"], "/healthz");
    }

    async fn graphql_backend(status: &'static str) -> String {
        let app = Router::new().route(
            "/graphql",
            post(move |Json(body): Json<serde_json::Value>| async move {
                let query = body["query"].as_str().unwrap_or_default().to_string();
                let id = body["variables"]["id"].clone();
                if query.contains("buildLogs") {
                    Json(serde_json::json!({"data": {"buildLogs": [{"message": "npm ERR! missing script: start"}]}}))
                } else {
                    Json(serde_json::json!({"data": {"deployment": {
                        "id": id, "status": status, "staticUrl": "shop-prod.up.railway.app"
                    }}}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/graphql", addr)
    }

    fn detached_adapter(runner: Arc<ScriptedRunner>, api_url: String) -> RailwayAdapter {
        let settings = ProviderSettings {
            railway_api_url: api_url,
            ..Default::default()
        };
        RailwayAdapter::new(
            runner,
            &settings,
            None,
            Some(SecretString::from("api-token")),
            Timeouts::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_polled_success_uses_static_url() {
        let runner = usable_runner();
        runner.on(
            "railway up --detach",
            CommandOutput::ok("Build Logs: https://railway.app/project/p/service/s?id=0b6a2c1e-1111-2222-3333-444455556666"),
        );
        let adapter = detached_adapter(runner, graphql_backend("SUCCESS").await);

        let dir = tempfile::tempdir().unwrap();
        let result = adapter.deploy(&options(dir.path())).await.unwrap();
        assert!(result.success);
        assert_eq!(result.url.as_deref(), Some("https://shop-prod.up.railway.app"));
    }

    #[tokio::test]
    async fn test_polled_crash_fetches_build_logs() {
        let runner = usable_runner();
        runner.on(
            "railway up --detach",
            CommandOutput::ok("Build Logs: https://railway.app/project/p/service/s?id=0b6a2c1e-1111-2222-3333-444455556666"),
        );
        let adapter = detached_adapter(runner, graphql_backend("CRASHED").await);

        let dir = tempfile::tempdir().unwrap();
        let result = adapter.deploy(&options(dir.path())).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Crashed"));
        assert_eq!(result.logs.last().unwrap(), "npm ERR! missing script: start");
    }
}
