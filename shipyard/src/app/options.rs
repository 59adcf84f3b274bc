//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::engine;
use crate::storage::settings::{
    EngineSettings, ProviderSettings, RateLimitSettings, RoutingSettings, Settings,
};
use crate::workers::sweeper;

/// Origin (control plane) options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// HTTP server configuration
    pub server: ServerOptions,

    pub routing: RoutingSettings,

    pub rate_limit: RateLimitSettings,

    pub engine: engine::Options,

    pub engine_settings: EngineSettings,

    pub providers: ProviderSettings,

    /// Bare repositories of the git server; commits cannot be resolved
    /// without it
    pub repos_root: Option<PathBuf>,

    /// Store snapshot directory; in-memory only when unset
    pub data_dir: Option<PathBuf>,

    pub sweeper: sweeper::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            routing: settings.routing.clone(),
            rate_limit: settings.rate_limit.clone(),
            engine: engine::Options {
                auto_deploy: settings.auto_deploy,
                uploads_root: settings.uploads_root.clone(),
            },
            engine_settings: settings.engine.clone(),
            providers: settings.providers.clone(),
            repos_root: settings.repos_root.clone(),
            data_dir: settings.data_dir.clone(),
            sweeper: sweeper::Options {
                interval: Duration::from_secs(settings.sweep_interval_secs.max(1)),
            },
        }
    }
}

/// Edge layer options
#[derive(Debug, Clone)]
pub struct EdgeOptions {
    pub lifecycle: LifecycleOptions,

    pub server: ServerOptions,

    /// Primary origin for lookups and passthrough traffic
    pub origin_url: String,

    pub cache_ttl: Duration,

    pub lookup_timeout: Duration,

    pub proxy_timeout: Duration,

    pub reserved_labels: Vec<String>,

    pub sweeper: sweeper::Options,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl EdgeOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.edge.host.clone(),
                port: settings.edge.port,
            },
            origin_url: settings.edge.origin_url.clone(),
            cache_ttl: Duration::from_secs(settings.edge.cache_ttl_secs),
            lookup_timeout: Duration::from_secs(settings.edge.lookup_timeout_secs),
            proxy_timeout: Duration::from_secs(settings.routing.proxy_timeout_secs),
            reserved_labels: settings.routing.reserved_labels.clone(),
            sweeper: sweeper::Options {
                interval: Duration::from_secs(settings.sweep_interval_secs.max(1)),
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, running deployments included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
