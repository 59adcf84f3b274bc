//! Fly.io adapter

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use provider_models::fly::AppStatus;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::models::provider::{ProviderKind, ProviderStatus};
use crate::providers::output::{find_host_url, is_already_exists, lines};
use crate::providers::{
    ensure_usable, parse_version, DeployOptions, ProviderAdapter, ProviderDeployResult,
};
use crate::storage::settings::{ProviderSettings, Timeouts};

const URL_SUFFIX: &str = ".fly.dev";
const DEFAULT_INTERNAL_PORT: u16 = 8080;

/// Minimal `fly.toml` for an app without one
pub fn render_fly_toml(options: &DeployOptions) -> String {
    let mut toml = String::new();
    let _ = writeln!(toml, "app = \"{}\"", options.app_name);
    if let Some(region) = &options.region {
        let _ = writeln!(toml, "primary_region = \"{}\"", region);
    }
    let _ = writeln!(toml);
    let _ = writeln!(toml, "[http_service]");
    let _ = writeln!(
        toml,
        "  internal_port = {}",
        options.port().unwrap_or(DEFAULT_INTERNAL_PORT)
    );
    let _ = writeln!(toml, "  force_https = true");
    let _ = writeln!(toml, "  auto_stop_machines = \"stop\"");
    let _ = writeln!(toml, "  auto_start_machines = true");
    if let Some(path) = options.healthcheck() {
        let _ = writeln!(toml);
        let _ = writeln!(toml, "[[http_service.checks]]");
        let _ = writeln!(toml, "  method = \"GET\"");
        let _ = writeln!(toml, "  path = \"{}\"", path);
        let _ = writeln!(toml, "  interval = \"15s\"");
        let _ = writeln!(toml, "  timeout = \"5s\"");
        let _ = writeln!(toml, "  grace_period = \"10s\"");
    }
    toml
}

pub struct FlyAdapter {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    org: Option<String>,
    token: Option<SecretString>,
    timeouts: Timeouts,
}

impl FlyAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: &ProviderSettings,
        token: Option<SecretString>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            runner,
            cli: settings.fly_cli.clone(),
            org: settings.fly_org.clone(),
            token,
            timeouts,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(&self.cli, args).timeout(self.timeouts.check);
        match &self.token {
            Some(token) => spec.env("FLY_API_TOKEN", token.expose_secret()),
            None => spec,
        }
    }

    async fn write_config(&self, options: &DeployOptions) -> Result<(), ControlError> {
        let config = File::new(options.source_path.join("fly.toml"));
        if config.exists().await {
            return Ok(());
        }
        debug!("Writing fly.toml for {}", options.app_name);
        config.write_string(&render_fly_toml(options)).await
    }

    async fn provision(&self, options: &DeployOptions, logs: &mut Vec<String>) -> Result<(), ControlError> {
        let mut spec = self.command(["apps", "create", options.app_name.as_str()]);
        if let Some(org) = &self.org {
            spec = spec.arg("--org").arg(org);
        }
        let output = self.runner.run(&spec).await?;
        if output.success {
            logs.push(format!("Created Fly app {}", options.app_name));
        } else if is_already_exists(&output.combined()) {
            logs.push(format!("Fly app {} already exists", options.app_name));
        } else {
            return Err(output.into_provider_error("flyctl apps create failed"));
        }
        Ok(())
    }

    async fn set_secrets(&self, options: &DeployOptions, logs: &mut Vec<String>) {
        for (key, value) in &options.env {
            let spec = self.command([
                "secrets".to_string(),
                "set".to_string(),
                "--stage".to_string(),
                "--app".to_string(),
                options.app_name.clone(),
                format!("{}={}", key, value),
            ]);
            match self.runner.run(&spec).await {
                Ok(output) if output.success => logs.push(format!("Staged secret {}", key)),
                Ok(output) => {
                    warn!("Failed to stage Fly secret {}: {}", key, output.stderr);
                    logs.push(format!("Warning: failed to set secret {}", key));
                }
                Err(e) => {
                    warn!("Failed to stage Fly secret {}: {}", key, e);
                    logs.push(format!("Warning: failed to set secret {}", key));
                }
            }
        }
    }

    async fn query_url(&self, app_name: &str) -> Option<String> {
        let spec = self.command(["status", "--app", app_name, "--json"]);
        let output = match self.runner.run(&spec).await {
            Ok(output) if output.success => output,
            Ok(output) => {
                warn!("flyctl status failed: {}", output.stderr);
                return None;
            }
            Err(e) => {
                warn!("flyctl status failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<AppStatus>(&output.stdout) {
            Ok(status) => Some(
                status
                    .hostname
                    .filter(|h| !h.is_empty())
                    .map(|h| format!("https://{}", h))
                    .unwrap_or_else(|| format!("https://{}{}", app_name, URL_SUFFIX)),
            ),
            Err(e) => {
                warn!("Unable to parse flyctl status output: {}", e);
                None
            }
        }
    }

    async fn attach_domain(&self, options: &DeployOptions, domain: &str, logs: &mut Vec<String>) -> bool {
        let spec = self.command(["certs", "add", domain, "--app", options.app_name.as_str()]);
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
        self.write_config(options).await?;
        self.provision(options, logs).await?;
        self.set_secrets(options, logs).await;

        let mut spec = self
            .command(["deploy", "--app", options.app_name.as_str(), "--yes"])
            .cwd(&options.source_path)
            .timeout(self.timeouts.deploy);
        spec = match &options.local_image {
            Some(image) => {
                logs.push(format!("Deploying local image {}", image));
                spec.arg("--local-only").arg("--image").arg(image)
            }
            None => spec.arg("--remote-only"),
        };

        let output = self.runner.run(&spec).await?;
        logs.extend(lines(&output.combined()));
        if !output.success {
            return Err(ControlError::provider("flyctl deploy failed"));
        }

        let url = match find_host_url(&output.combined(), URL_SUFFIX) {
            Some(url) => Some(url),
            None => self.query_url(&options.app_name).await,
        };

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
impl ProviderAdapter for FlyAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fly
    }

    async fn check_status(&self) -> ProviderStatus {
        let version = match self.runner.run(&self.command(["version"])).await {
            Ok(output) if output.success => parse_version(&output.stdout),
            _ => return ProviderStatus::missing(ProviderKind::Fly),
        };

        let authenticated = matches!(
            self.runner.run(&self.command(["auth", "whoami"])).await,
            Ok(CommandOutput { success: true, .. })
        );

        ProviderStatus {
            provider: ProviderKind::Fly,
            installed: true,
            authenticated,
            version,
        }
    }

    async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError> {
        ensure_usable(&self.check_status().await)?;
        info!("Deploying {} to Fly.io", options.app_name);

        let mut logs = Vec::new();
        match self.release(options, &mut logs).await {
            Ok(result) => Ok(result),
            Err(e) => ProviderDeployResult::interrupted(e, logs),
        }
    }
}
