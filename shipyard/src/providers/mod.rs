//! Hosting provider adapters
//!
//! Every backend is driven through its own CLI (and, for Railway, its
//! GraphQL API) behind the [`ProviderAdapter`] trait. The set of providers
//! is closed: [`ProviderRegistry`] holds one adapter per [`ProviderKind`]
//! in autodetection order.

pub mod fly;
pub mod output;
pub mod poll;
pub mod railway;
pub mod vercel;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::deploy::command::CommandRunner;
use crate::errors::ControlError;
use crate::models::manifest::Manifest;
use crate::models::provider::{ProviderKind, ProviderStatus};
use crate::providers::output::lines;
use crate::storage::settings::{ProviderSettings, Timeouts};

/// Everything an adapter needs to ship one source tree
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub deployment_id: String,
    pub source_path: PathBuf,

    /// Sanitized application name, used as the remote service name
    pub app_name: String,

    pub manifest: Option<Manifest>,

    /// Manifest env overlaid by request env, plus `PORT`
    pub env: BTreeMap<String, String>,

    pub custom_domain: Option<String>,
    pub region: Option<String>,

    /// Locally built image, when one exists
    pub local_image: Option<String>,
}

impl DeployOptions {
    pub fn healthcheck(&self) -> Option<&str> {
        self.manifest
            .as_ref()
            .and_then(|m| m.deploy.healthcheck.as_deref())
    }

    pub fn port(&self) -> Option<u16> {
        self.manifest.as_ref().and_then(|m| m.deploy.port)
    }
}

/// Outcome of one adapter deploy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderDeployResult {
    pub success: bool,
    pub url: Option<String>,

    /// Set only when the custom domain was actually attached
    pub custom_domain: Option<String>,

    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl ProviderDeployResult {
    pub fn succeeded(url: Option<String>, logs: Vec<String>) -> Self {
        Self {
            success: true,
            url,
            logs,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            logs,
            ..Default::default()
        }
    }

    /// A run that broke after `logs` started accumulating: keep those lines
    /// and any captured process output. Configuration errors propagate.
    pub fn interrupted(error: ControlError, mut logs: Vec<String>) -> Result<Self, ControlError> {
        if matches!(error, ControlError::ConfigError(_)) {
            return Err(error);
        }
        let message = error.to_string();
        if let ControlError::ProviderError { stdout, stderr, .. } = &error {
            logs.extend(lines(stdout));
            logs.extend(lines(stderr));
        }
        Ok(Self::failed(message, logs))
    }
}

/// A hosting backend.
///
/// `deploy` returns `Err` for configuration problems (tool missing or not
/// authenticated). Once provisioning has started, failed or timed-out
/// invocations come back as `Ok` with `success: false` and the lines logged
/// so far, as do deployments the provider itself reports as failed.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn check_status(&self) -> ProviderStatus;

    async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError>;
}

/// Fail with a configuration error unless the provider is usable
pub(crate) fn ensure_usable(status: &ProviderStatus) -> Result<(), ControlError> {
    if !status.installed {
        return Err(ControlError::ConfigError(format!(
            "{} CLI is not installed",
            status.provider
        )));
    }
    if !status.authenticated {
        return Err(ControlError::ConfigError(format!(
            "{} CLI is not authenticated",
            status.provider
        )));
    }
    Ok(())
}

/// First dotted version number in a `--version` output
pub(crate) fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|word| word.trim_start_matches('v').trim_end_matches(','))
        .find(|word| {
            word.contains('.') && word.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .map(str::to_string)
}

/// Provider tokens, taken from the environment
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub railway_token: Option<SecretString>,
    pub railway_api_token: Option<SecretString>,
    pub fly_api_token: Option<SecretString>,
    pub vercel_token: Option<SecretString>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        Self {
            railway_token: var("RAILWAY_TOKEN"),
            railway_api_token: var("RAILWAY_API_TOKEN"),
            fly_api_token: var("FLY_API_TOKEN"),
            vercel_token: var("VERCEL_TOKEN"),
        }
    }
}

/// Fixed table of adapters in autodetection order
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(mut adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        adapters.sort_by_key(|adapter| {
            ProviderKind::PRIORITY
                .iter()
                .position(|kind| *kind == adapter.kind())
                .unwrap_or(usize::MAX)
        });
        adapters.dedup_by_key(|adapter| adapter.kind());
        Self { adapters }
    }

    /// The three real adapters
    pub fn from_settings(
        settings: &ProviderSettings,
        credentials: ProviderCredentials,
        runner: Arc<dyn CommandRunner>,
        timeouts: Timeouts,
    ) -> Result<Self, ControlError> {
        let railway = railway::RailwayAdapter::new(
            runner.clone(),
            settings,
            credentials.railway_token.clone(),
            credentials.railway_api_token.clone(),
            timeouts,
        )?;
        let fly = fly::FlyAdapter::new(
            runner.clone(),
            settings,
            credentials.fly_api_token.clone(),
            timeouts,
        );
        let vercel = vercel::VercelAdapter::new(
            runner,
            settings,
            credentials.vercel_token.clone(),
            timeouts,
        );

        let adapters: Vec<Arc<dyn ProviderAdapter>> =
            vec![Arc::new(railway), Arc::new(fly), Arc::new(vercel)];
        Ok(Self::new(adapters))
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.kind() == kind).cloned()
    }

    /// Status snapshot of every provider, in priority order
    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        futures::future::join_all(self.adapters.iter().map(|a| a.check_status())).await
    }

    /// Pick the adapter for a deployment: explicit choice, then the
    /// manifest's, then the first usable provider in priority order
    pub async fn resolve(
        &self,
        explicit: Option<&str>,
        manifest: Option<&Manifest>,
    ) -> Result<Arc<dyn ProviderAdapter>, ControlError> {
        let requested = explicit
            .filter(|p| !p.trim().is_empty())
            .or_else(|| manifest.and_then(|m| m.deploy.provider.as_deref()))
            .filter(|p| !p.trim().is_empty());

        if let Some(requested) = requested {
            let kind = ProviderKind::from_str(requested)?;
            debug!("Using requested provider {}", kind);
            return self.get(kind).ok_or_else(|| {
                ControlError::ConfigError(format!("Provider {} is not configured", kind))
            });
        }

        for adapter in &self.adapters {
            let status = adapter.check_status().await;
            if status.is_usable() {
                info!("Autodetected provider {}", status.provider);
                return Ok(adapter.clone());
            }
            debug!(
                "Provider {} unavailable (installed: {}, authenticated: {})",
                status.provider, status.installed, status.authenticated
            );
        }

        Err(ControlError::ConfigError(
            "No deployment provider is installed and authenticated".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Adapter with a fixed status and outcome that records deploy calls
    pub struct FakeAdapter {
        pub kind: ProviderKind,
        pub usable: bool,
        pub outcome: Mutex<Result<ProviderDeployResult, String>>,
        pub deploys: Mutex<Vec<DeployOptions>>,
    }

    impl FakeAdapter {
        pub fn new(kind: ProviderKind, usable: bool) -> Self {
            Self {
                kind,
                usable,
                outcome: Mutex::new(Ok(ProviderDeployResult::succeeded(
                    Some(format!("https://app.{}.example", kind)),
                    vec![format!("deployed to {}", kind)],
                ))),
                deploys: Mutex::new(Vec::new()),
            }
        }

        pub fn deploy_count(&self) -> usize {
            self.deploys.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn check_status(&self) -> ProviderStatus {
            ProviderStatus {
                provider: self.kind,
                installed: self.usable,
                authenticated: self.usable,
                version: self.usable.then(|| "1.0.0".to_string()),
            }
        }

        async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError> {
            self.deploys.lock().unwrap().push(options.clone());
            self.outcome
                .lock()
                .unwrap()
                .clone()
                .map_err(ControlError::provider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAdapter;
    use super::*;

    fn registry(usable: [bool; 3]) -> ProviderRegistry {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(FakeAdapter::new(ProviderKind::Vercel, usable[2])),
            Arc::new(FakeAdapter::new(ProviderKind::Railway, usable[0])),
            Arc::new(FakeAdapter::new(ProviderKind::Fly, usable[1])),
        ];
        ProviderRegistry::new(adapters)
    }

    #[tokio::test]
    async fn test_autodetect_follows_priority() {
        let adapter = registry([true, true, true]).resolve(None, None).await.unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Railway);

        let adapter = registry([false, false, true]).resolve(None, None).await.unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Vercel);

        let err = registry([false, false, false]).resolve(None, None).await.err().unwrap();
        assert!(matches!(err, ControlError::ConfigError(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_manifest_provider_beats_higher_priority() {
        let manifest = Manifest::parse("shipyard.json", r#"{"deploy": {"provider": "fly"}}"#).unwrap();
        let adapter = registry([true, true, true])
            .resolve(None, Some(&manifest))
            .await
            .unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Fly);

        // explicit choice beats the manifest
        let adapter = registry([true, true, true])
            .resolve(Some("vercel"), Some(&manifest))
            .await
            .unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Vercel);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_validation_error() {
        let err = registry([true, true, true])
            .resolve(Some("heroku"), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ControlError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_statuses_in_priority_order() {
        let kinds: Vec<_> = registry([true, false, true])
            .statuses()
            .await
            .into_iter()
            .map(|s| (s.provider, s.is_usable()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ProviderKind::Railway, true),
                (ProviderKind::Fly, false),
                (ProviderKind::Vercel, true),
            ]
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("railway 3.17.1").as_deref(), Some("3.17.1"));
        assert_eq!(
            parse_version("flyctl v0.3.45 linux/amd64 Commit: abc").as_deref(),
            Some("0.3.45")
        );
        assert_eq!(parse_version("Vercel CLI 37.4.2").as_deref(), Some("37.4.2"));
        assert_eq!(parse_version("no version here"), None);
    }
}
