//! Local container image builds through the Docker CLI

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ControlError;
use crate::storage::settings::Timeouts;

/// Build descriptor that opts a repository into a local build
pub const BUILD_DESCRIPTOR: &str = "Dockerfile";

pub struct BuildHelper {
    runner: Arc<dyn CommandRunner>,
    docker: String,
    timeouts: Timeouts,
}

impl BuildHelper {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: Timeouts) -> Self {
        Self {
            runner,
            docker: "docker".to_string(),
            timeouts,
        }
    }

    pub async fn has_descriptor(source_dir: &Path) -> bool {
        tokio::fs::metadata(source_dir.join(BUILD_DESCRIPTOR))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// `shipyard-<app>:<tag>`, tag being the short commit or the deployment id
    pub fn image_name(app_name: &str, commit: &str, deployment_id: &str) -> String {
        let tag: String = if commit.is_empty() {
            deployment_id.chars().take(12).collect()
        } else {
            commit.chars().take(12).collect()
        };
        format!("shipyard-{}:{}", app_name, tag)
    }

    /// Docker CLI installed and daemon reachable
    pub async fn is_available(&self) -> bool {
        let version = CommandSpec::new(&self.docker, ["--version"]).timeout(self.timeouts.check);
        match self.runner.run(&version).await {
            Ok(output) if output.success => {}
            Ok(_) | Err(_) => {
                debug!("Docker CLI is not installed");
                return false;
            }
        }

        let info = CommandSpec::new(&self.docker, ["info"]).timeout(self.timeouts.check);
        match self.runner.run(&info).await {
            Ok(output) if output.success => true,
            _ => {
                debug!("Docker daemon is not running");
                false
            }
        }
    }

    /// Build `image` from `source_dir`, streaming output lines into `lines`
    pub async fn build(
        &self,
        source_dir: &Path,
        image: &str,
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, ControlError> {
        info!("Building image {} from {}", image, source_dir.display());
        let spec = CommandSpec::new(&self.docker, ["build", "-t", image, "."])
            .cwd(source_dir)
            .timeout(self.timeouts.build);

        let output = self.runner.run_streaming(&spec, lines).await?;
        if !output.success {
            return Err(output.into_provider_error(format!("Image build failed for {}", image)));
        }
        Ok(output)
    }

    /// Best-effort removal of a built image
    pub async fn remove_image(&self, image: &str) {
        let spec = CommandSpec::new(&self.docker, ["rmi", "-f", image]).timeout(self.timeouts.check);
        match self.runner.run(&spec).await {
            Ok(output) if output.success => debug!("Removed image {}", image),
            Ok(output) => warn!("Failed to remove image {}: {}", image, output.stderr),
            Err(e) => warn!("Failed to remove image {}: {}", image, e),
        }
    }
}
