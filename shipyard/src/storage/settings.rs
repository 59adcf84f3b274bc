//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ControlError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Control-plane settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_json: bool,

    /// Also write rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Origin (control plane) HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Edge proxy layer
    #[serde(default)]
    pub edge: EdgeSettings,

    #[serde(default)]
    pub routing: RoutingSettings,

    /// Directory of the git server's bare repositories (`<name>.git`)
    #[serde(default)]
    pub repos_root: Option<PathBuf>,

    /// Directory for the store snapshot; in-memory only when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Pre-extracted source trees must live under this directory; requests
    /// carrying a `sourcePath` are refused when unset
    #[serde(default)]
    pub uploads_root: Option<PathBuf>,

    /// Deploy automatically on pushes to the default branch
    #[serde(default = "default_true")]
    pub auto_deploy: bool,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub providers: ProviderSettings,

    /// Interval of the cache / rate-limit sweeper in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            edge: EdgeSettings::default(),
            routing: RoutingSettings::default(),
            repos_root: None,
            data_dir: None,
            uploads_root: None,
            auto_deploy: true,
            rate_limit: RateLimitSettings::default(),
            engine: EngineSettings::default(),
            providers: ProviderSettings::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load(file: &File) -> Result<Self, ControlError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_edge_port")]
    pub port: u16,

    /// Primary origin that passthrough traffic and lookups go to
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    #[serde(default = "default_edge_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
}

fn default_edge_port() -> u16 {
    8443
}

fn default_origin_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_edge_ttl() -> u64 {
    60
}

fn default_lookup_timeout() -> u64 {
    5
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_edge_port(),
            origin_url: default_origin_url(),
            cache_ttl_secs: default_edge_ttl(),
            lookup_timeout_secs: default_lookup_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// First labels that are never treated as application names
    #[serde(default = "default_reserved_labels")]
    pub reserved_labels: Vec<String>,

    #[serde(default = "default_origin_ttl")]
    pub origin_cache_ttl_secs: u64,

    /// Upstream timeout for proxied requests
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_secs: u64,
}

fn default_reserved_labels() -> Vec<String> {
    ["", "www", "api", "git", "ssh"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_origin_ttl() -> u64 {
    300
}

fn default_proxy_timeout() -> u64 {
    60
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            reserved_labels: default_reserved_labels(),
            origin_cache_ttl_secs: default_origin_ttl(),
            proxy_timeout_secs: default_proxy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    120
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            max_requests: default_max_requests(),
        }
    }
}

/// Timeouts of the deployment pipeline, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    #[serde(default = "default_long_timeout")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_long_timeout")]
    pub deploy_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_long_timeout")]
    pub poll_max_wait_secs: u64,
}

fn default_check_timeout() -> u64 {
    30
}

fn default_long_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            check_timeout_secs: default_check_timeout(),
            build_timeout_secs: default_long_timeout(),
            deploy_timeout_secs: default_long_timeout(),
            poll_interval_secs: default_poll_interval(),
            poll_max_wait_secs: default_long_timeout(),
        }
    }
}

impl EngineSettings {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            check: Duration::from_secs(self.check_timeout_secs),
            build: Duration::from_secs(self.build_timeout_secs),
            deploy: Duration::from_secs(self.deploy_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_max_wait: Duration::from_secs(self.poll_max_wait_secs),
        }
    }
}

/// Resolved pipeline timeouts
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub check: Duration,
    pub build: Duration,
    pub deploy: Duration,
    pub poll_interval: Duration,
    pub poll_max_wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        EngineSettings::default().timeouts()
    }
}

/// Provider CLI names and endpoints. Tokens come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_railway_cli")]
    pub railway_cli: String,

    #[serde(default = "default_railway_api")]
    pub railway_api_url: String,

    #[serde(default = "default_fly_cli")]
    pub fly_cli: String,

    /// Fly organization new apps are created in
    #[serde(default)]
    pub fly_org: Option<String>,

    #[serde(default = "default_vercel_cli")]
    pub vercel_cli: String,

    /// Vercel team scope
    #[serde(default)]
    pub vercel_scope: Option<String>,
}

fn default_railway_cli() -> String {
    "railway".to_string()
}

fn default_railway_api() -> String {
    "https://backboard.railway.app/graphql/v2".to_string()
}

fn default_fly_cli() -> String {
    "flyctl".to_string()
}

fn default_vercel_cli() -> String {
    "vercel".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            railway_cli: default_railway_cli(),
            railway_api_url: default_railway_api(),
            fly_cli: default_fly_cli(),
            fly_org: None,
            vercel_cli: default_vercel_cli(),
            vercel_scope: None,
        }
    }
}
