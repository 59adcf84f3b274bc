//! Vercel adapter

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ControlError;
use crate::models::provider::{ProviderKind, ProviderStatus};
use crate::providers::output::{find_url, is_already_exists, lines};
use crate::providers::{
    ensure_usable, parse_version, DeployOptions, ProviderAdapter, ProviderDeployResult,
};
use crate::storage::settings::{ProviderSettings, Timeouts};

const URL_SUFFIX: &str = ".vercel.app";

pub struct VercelAdapter {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    scope: Option<String>,
    token: Option<SecretString>,
    timeouts: Timeouts,
}

impl VercelAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        settings: &ProviderSettings,
        token: Option<SecretString>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            runner,
            cli: settings.vercel_cli.clone(),
            scope: settings.vercel_scope.clone(),
            token,
            timeouts,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(&self.cli, args).timeout(self.timeouts.check);
        if let Some(scope) = &self.scope {
            spec = spec.arg("--scope").arg(scope);
        }
        match &self.token {
            Some(token) => spec.env("VERCEL_TOKEN", token.expose_secret()),
            None => spec,
        }
    }

    async fn provision(&self, options: &DeployOptions, logs: &mut Vec<String>) -> Result<(), ControlError> {
        let output = self
            .runner
            .run(&self.command(["project", "add", options.app_name.as_str()]))
            .await?;
        if output.success {
            logs.push(format!("Created Vercel project {}", options.app_name));
        } else if is_already_exists(&output.combined()) {
            logs.push(format!("Vercel project {} already exists", options.app_name));
        } else {
            return Err(output.into_provider_error("vercel project add failed"));
        }

        let link = self
            .command(["link", "--yes", "--project", options.app_name.as_str()])
            .cwd(&options.source_path);
        let output = self.runner.run(&link).await?;
        if !output.success {
            return Err(output.into_provider_error("vercel link failed"));
        }
        Ok(())
    }

    async fn set_env(&self, options: &DeployOptions, logs: &mut Vec<String>) {
        for (key, value) in &options.env {
            // the value goes through stdin so it never shows up in process listings
            let spec = self
                .command(["env", "add", key.as_str(), "production"])
                .cwd(&options.source_path)
                .stdin(value.as_str());
            match self.runner.run(&spec).await {
                Ok(output) if output.success || is_already_exists(&output.combined()) => {
                    logs.push(format!("Set variable {}", key))
                }
                Ok(output) => {
                    warn!("Failed to set Vercel variable {}: {}", key, output.stderr);
                    logs.push(format!("Warning: failed to set variable {}", key));
                }
                Err(e) => {
                    warn!("Failed to set Vercel variable {}: {}", key, e);
                    logs.push(format!("Warning: failed to set variable {}", key));
                }
            }
        }
    }

    async fn query_url(&self, options: &DeployOptions) -> Option<String> {
        let spec = self
            .command(["ls", options.app_name.as_str(), "--prod"])
            .cwd(&options.source_path);
        match self.runner.run(&spec).await {
            Ok(output) if output.success => find_url(&output.combined(), URL_SUFFIX),
            Ok(output) => {
                warn!("vercel ls failed: {}", output.stderr);
                None
            }
            Err(e) => {
                warn!("vercel ls failed: {}", e);
                None
            }
        }
    }

    async fn attach_domain(&self, options: &DeployOptions, domain: &str, logs: &mut Vec<String>) -> bool {
        let spec = self
            .command(["domains", "add", domain, options.app_name.as_str()])
            .cwd(&options.source_path);
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
        self.provision(options, logs).await?;
        self.set_env(options, logs).await;

        let spec = self
            .command(["deploy", "--prod", "--yes"])
            .cwd(&options.source_path)
            .timeout(self.timeouts.deploy);
        let output = self.runner.run(&spec).await?;
        logs.extend(lines(&output.combined()));
        if !output.success {
            return Err(ControlError::provider("vercel deploy failed"));
        }

        // stdout carries the deployment URL, stderr the progress
        let url = match find_url(&output.stdout, URL_SUFFIX).or_else(|| find_url(&output.stderr, URL_SUFFIX)) {
            Some(url) => Some(url),
            None => self.query_url(options).await,
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
impl ProviderAdapter for VercelAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vercel
    }

    async fn check_status(&self) -> ProviderStatus {
        let version = match self.runner.run(&self.command(["--version"])).await {
            Ok(output) if output.success => parse_version(&output.combined()),
            _ => return ProviderStatus::missing(ProviderKind::Vercel),
        };

        let authenticated = matches!(
            self.runner.run(&self.command(["whoami"])).await,
            Ok(CommandOutput { success: true, .. })
        );

        ProviderStatus {
            provider: ProviderKind::Vercel,
            installed: true,
            authenticated,
            version,
        }
    }

    async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError> {
        ensure_usable(&self.check_status().await)?;
        info!("Deploying {} to Vercel", options.app_name);

        let mut logs = Vec::new();
        match self.release(options, &mut logs).await {
            Ok(result) => Ok(result),
            Err(e) => ProviderDeployResult::interrupted(e, logs),
        }
    }
}
