//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

use crate::app::options::{AppOptions, EdgeOptions};
use crate::cache::subdomain::SubdomainCache;
use crate::deploy::builder::BuildHelper;
use crate::deploy::command::{CommandRunner, SystemRunner};
use crate::deploy::engine::Engine;
use crate::deploy::source::SourceCheckout;
use crate::deploy::supervisor::TaskSet;
use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::http::client::HttpClient;
use crate::providers::{ProviderCredentials, ProviderRegistry};
use crate::routing::edge::EdgeState;
use crate::routing::origin::OriginRouting;
use crate::routing::proxy::Proxy;
use crate::routing::resolver::{OriginResolver, StoreResolver};
use crate::routing::SubdomainRouter;
use crate::server::ratelimit::RateLimiter;
use crate::server::state::ServerState;
use crate::store::Store;
use crate::webhooks::dispatcher::WebhookDispatcher;
use crate::webhooks::Notifier;
use crate::workers::sweeper::Sweep;

/// Origin application state
pub struct AppState {
    pub store: Arc<Store>,
    pub tasks: Arc<TaskSet>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub engine: Arc<Engine>,
    pub subdomains: Arc<SubdomainCache>,
    pub limiter: Arc<RateLimiter>,
    pub routing: Arc<OriginRouting>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, ControlError> {
        info!("Initializing application state...");

        let store = match &options.data_dir {
            Some(path) => {
                let dir = Dir::new(path);
                dir.create().await?;
                Arc::new(Store::open(dir.file("state.json")).await?)
            }
            None => {
                info!("No data_dir configured, deployments are kept in memory only");
                Arc::new(Store::in_memory())
            }
        };

        let tasks = Arc::new(TaskSet::new());
        let dispatcher = Arc::new(WebhookDispatcher::new(store.clone(), tasks.clone())?);

        let timeouts = options.engine_settings.timeouts();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let registry = Arc::new(ProviderRegistry::from_settings(
            &options.providers,
            ProviderCredentials::from_env(),
            runner.clone(),
            timeouts,
        )?);
        let source = options
            .repos_root
            .as_ref()
            .map(|root| SourceCheckout::new(runner.clone(), root, timeouts.build));
        let notifier: Arc<dyn Notifier> = dispatcher.clone();

        let engine = Arc::new(Engine::new(
            store.clone(),
            registry,
            BuildHelper::new(runner, timeouts),
            source,
            notifier,
            tasks.clone(),
            options.engine.clone(),
        ));

        let subdomains = Arc::new(SubdomainCache::new(Duration::from_secs(
            options.routing.origin_cache_ttl_secs,
        )));
        let router = SubdomainRouter::new(
            subdomains.clone(),
            Arc::new(StoreResolver::new(store.clone())),
            options.routing.reserved_labels.clone(),
        );
        let proxy = Proxy::new(Duration::from_secs(options.routing.proxy_timeout_secs))?;
        let routing = Arc::new(OriginRouting::new(router, proxy));

        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(options.rate_limit.window_secs),
            options.rate_limit.max_requests,
        ));

        Ok(Self {
            store,
            tasks,
            dispatcher,
            engine,
            subdomains,
            limiter,
            routing,
        })
    }

    pub fn server_state(&self) -> ServerState {
        ServerState::new(self.store.clone(), self.engine.clone(), self.dispatcher.clone())
    }

    pub fn sweep_targets(&self) -> Vec<(&'static str, Arc<dyn Sweep>)> {
        vec![
            ("subdomain cache", self.subdomains.clone() as Arc<dyn Sweep>),
            ("rate limiter", self.limiter.clone() as Arc<dyn Sweep>),
        ]
    }

    /// Drain running deployments and deliveries
    pub async fn shutdown(&self, max_delay: Duration) -> Result<(), ControlError> {
        info!("Shutting down application state...");
        self.tasks.shutdown(max_delay).await;
        self.subdomains.clear();
        Ok(())
    }
}

/// Edge application state
pub struct EdgeAppState {
    pub edge: Arc<EdgeState>,
    pub subdomains: Arc<SubdomainCache>,
}

impl EdgeAppState {
    pub fn init(options: &EdgeOptions) -> Result<Self, ControlError> {
        info!("Initializing edge state...");

        let origin = Url::parse(&options.origin_url)
            .map_err(|e| ControlError::ConfigError(format!("Invalid origin_url {}: {}", options.origin_url, e)))?;
        let client = HttpClient::new(&options.origin_url, options.lookup_timeout)?;

        let subdomains = Arc::new(SubdomainCache::new(options.cache_ttl));
        let router = SubdomainRouter::new(
            subdomains.clone(),
            Arc::new(OriginResolver::new(client)),
            options.reserved_labels.clone(),
        );
        let edge = Arc::new(EdgeState {
            router,
            proxy: Proxy::new(options.proxy_timeout)?,
            origin,
        });

        Ok(Self { edge, subdomains })
    }

    pub fn sweep_targets(&self) -> Vec<(&'static str, Arc<dyn Sweep>)> {
        vec![("subdomain cache", self.subdomains.clone() as Arc<dyn Sweep>)]
    }
}
