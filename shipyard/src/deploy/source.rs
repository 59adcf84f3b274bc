//! Source checkout from the git server's bare repositories

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::command::{CommandRunner, CommandSpec};
use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::models::repository::Repository;

pub struct SourceCheckout {
    runner: Arc<dyn CommandRunner>,
    repos_root: PathBuf,
    timeout: Duration,
}

impl SourceCheckout {
    pub fn new(runner: Arc<dyn CommandRunner>, repos_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            repos_root: repos_root.into(),
            timeout,
        }
    }

    /// `<repos_root>/<name>.git`
    pub fn bare_repo(&self, repository: &Repository) -> PathBuf {
        self.repos_root.join(format!("{}.git", repository.name))
    }

    /// Head of the default branch
    pub async fn resolve_commit(&self, repository: &Repository) -> Result<String, ControlError> {
        let git_dir = self.bare_repo(repository);
        let spec = CommandSpec::new(
            "git",
            [
                "--git-dir".to_string(),
                git_dir.display().to_string(),
                "rev-parse".to_string(),
                repository.default_branch.clone(),
            ],
        )
        .timeout(self.timeout);

        let output = self.runner.run(&spec).await?;
        let commit = output.stdout.trim().to_string();
        if !output.success || commit.is_empty() {
            return Err(ControlError::NotFound(format!(
                "Branch {} of {}",
                repository.default_branch, repository.name
            )));
        }
        Ok(commit)
    }

    /// Clone the repository into a fresh temporary directory at `commit`
    pub async fn checkout(&self, repository: &Repository, commit: &str) -> Result<Dir, ControlError> {
        let bare = self.bare_repo(repository);
        if !Dir::new(&bare).exists().await {
            return Err(ControlError::NotFound(format!(
                "Repository source {}",
                bare.display()
            )));
        }

        let target = Dir::temp_path(&format!("shipyard-{}", repository.name));
        info!("Checking out {}@{} into {}", repository.name, commit, target.path().display());

        let clone = CommandSpec::new(
            "git",
            [
                "clone".to_string(),
                "--quiet".to_string(),
                bare.display().to_string(),
                target.path().display().to_string(),
            ],
        )
        .timeout(self.timeout);
        let output = self.runner.run(&clone).await?;
        if !output.success {
            let _ = target.delete().await;
            return Err(output.into_provider_error(format!("git clone of {} failed", repository.name)));
        }

        let checkout = CommandSpec::new("git", ["checkout", "--quiet", commit])
            .cwd(target.path())
            .timeout(self.timeout);
        let output = self.runner.run(&checkout).await?;
        if !output.success {
            let _ = target.delete().await;
            return Err(output.into_provider_error(format!("git checkout of {} failed", commit)));
        }

        debug!("Checked out {} at {}", repository.name, commit);
        Ok(target)
    }

    pub async fn cleanup(checkout: &Dir) {
        if let Err(e) = checkout.delete().await {
            warn!("Failed to remove checkout {}: {}", checkout.path().display(), e);
        }
    }
}
