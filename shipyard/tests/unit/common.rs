//! Shared fixtures for the integration tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use shipyard::cache::subdomain::SubdomainCache;
use shipyard::deploy::builder::BuildHelper;
use shipyard::deploy::command::{CommandOutput, CommandRunner, CommandSpec};
use shipyard::deploy::engine::{self, Engine};
use shipyard::deploy::fsm::DeploymentEvent;
use shipyard::deploy::supervisor::TaskSet;
use shipyard::errors::ControlError;
use shipyard::models::deployment::Deployment;
use shipyard::models::provider::{ProviderKind, ProviderStatus};
use shipyard::models::repository::Repository;
use shipyard::providers::{DeployOptions, ProviderAdapter, ProviderDeployResult, ProviderRegistry};
use shipyard::routing::origin::OriginRouting;
use shipyard::routing::proxy::Proxy;
use shipyard::routing::resolver::StoreResolver;
use shipyard::routing::SubdomainRouter;
use shipyard::server::ratelimit::RateLimiter;
use shipyard::server::serve::app;
use shipyard::server::state::ServerState;
use shipyard::storage::settings::Timeouts;
use shipyard::store::{Completion, Store};
use shipyard::webhooks::dispatcher::WebhookDispatcher;
use shipyard::webhooks::Notifier;

// ================================ FAKES ======================================= //

/// A host without docker, git or provider CLIs
pub struct NoTools;

#[async_trait]
impl CommandRunner for NoTools {
    async fn run(&self, _spec: &CommandSpec) -> Result<CommandOutput, ControlError> {
        Ok(CommandOutput::failed("command not found"))
    }

    async fn run_streaming(
        &self,
        _spec: &CommandSpec,
        _lines: mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutput, ControlError> {
        Ok(CommandOutput::failed("command not found"))
    }
}

/// Usable provider that always deploys to `url`
pub struct StaticAdapter {
    pub kind: ProviderKind,
    pub url: String,
    pub deploys: AtomicUsize,
}

impl StaticAdapter {
    pub fn new(kind: ProviderKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            deploys: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProviderAdapter for StaticAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn check_status(&self) -> ProviderStatus {
        ProviderStatus {
            provider: self.kind,
            installed: true,
            authenticated: true,
            version: Some("1.0.0".to_string()),
        }
    }

    async fn deploy(&self, options: &DeployOptions) -> Result<ProviderDeployResult, ControlError> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderDeployResult::succeeded(
            Some(self.url.clone()),
            vec![format!("Deployed {}", options.app_name)],
        ))
    }
}

// ================================ HARNESS ===================================== //

pub struct Harness {
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
    pub adapter: Arc<StaticAdapter>,
    pub subdomains: Arc<SubdomainCache>,
    pub router: Router,

    /// The only place deploy requests may point `sourcePath` at
    pub uploads: tempfile::TempDir,
}

/// Origin application over an in-memory store and a single fly adapter
pub fn harness(max_requests: u32) -> Harness {
    let store = Arc::new(Store::in_memory());
    let tasks = Arc::new(TaskSet::new());
    let dispatcher = Arc::new(WebhookDispatcher::new(store.clone(), tasks.clone()).unwrap());

    let adapter = Arc::new(StaticAdapter::new(ProviderKind::Fly, "https://shop.fly.dev"));
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![adapter.clone()];
    let runner: Arc<dyn CommandRunner> = Arc::new(NoTools);
    let notifier: Arc<dyn Notifier> = dispatcher.clone();
    let uploads = tempfile::tempdir().unwrap();

    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(ProviderRegistry::new(adapters)),
        BuildHelper::new(runner, Timeouts::default()),
        None,
        notifier,
        tasks,
        engine::Options {
            uploads_root: Some(uploads.path().to_path_buf()),
            ..Default::default()
        },
    ));

    let subdomains = Arc::new(SubdomainCache::new(Duration::from_secs(300)));
    let routing = Arc::new(OriginRouting::new(
        SubdomainRouter::new(
            subdomains.clone(),
            Arc::new(StoreResolver::new(store.clone())),
            reserved_labels(),
        ),
        Proxy::new(Duration::from_secs(5)).unwrap(),
    ));
    let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), max_requests));

    let state = Arc::new(ServerState::new(store.clone(), engine.clone(), dispatcher));
    let router = app(state, routing, limiter);

    Harness {
        store,
        engine,
        adapter,
        subdomains,
        router,
        uploads,
    }
}

pub fn reserved_labels() -> Vec<String> {
    ["", "www", "api", "git", "ssh"].iter().map(|s| s.to_string()).collect()
}

pub async fn seed_repository(store: &Store, name: &str, owner: &str, private: bool) -> Repository {
    store
        .upsert_repository(name, owner, private, None)
        .await
        .unwrap()
}

/// A successful deployment of `repository` serving `url`
pub async fn live_deployment(store: &Store, repository: &Repository, url: &str) -> Deployment {
    let deployment = store
        .create_deployment(Deployment::new(repository, "0123456789abcdef", Some(ProviderKind::Fly), "alice"))
        .await
        .unwrap();
    store.advance(&deployment.id, DeploymentEvent::Deploy, &[]).await.unwrap();
    store
        .complete(
            &deployment.id,
            Completion {
                success: true,
                url: Some(url.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

// ================================ REQUESTS ==================================== //

pub fn request(method: Method, uri: &str, actor: Option<&str>, body: Option<Value>) -> Request {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "api.example.com");
    if let Some(actor) = actor {
        builder = builder.header("x-shipyard-actor", actor);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send through the router and decode the JSON body (`Null` when empty)
pub async fn send(router: &Router, request: Request) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, headers, body)
}

// ================================ BACKEND ===================================== //

/// What a loopback backend saw
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: String,
}

pub type SeenLog = Arc<Mutex<Vec<Seen>>>;

async fn record(State(seen): State<SeenLog>, request: Request) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();

    seen.lock().unwrap().push(Seen {
        method: parts.method.clone(),
        path_and_query: path_and_query.clone(),
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    (
        StatusCode::CREATED,
        [("x-backend", "loopback"), ("connection", "close")],
        format!("{} {}", parts.method, path_and_query),
    )
}

/// Record every request and answer `201 <METHOD> <path?query>`
pub async fn spawn_backend() -> (SocketAddr, SeenLog) {
    let seen: SeenLog = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(record).with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}
