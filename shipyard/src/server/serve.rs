//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ControlError;
use crate::routing::origin::{subdomain_middleware, OriginRouting};
use crate::server::handlers::{
    cancel_handler, create_webhook_handler, deploy_handler, deployment_logs_handler,
    get_deployment_handler, health_handler, list_deployments_handler, list_webhooks_handler,
    lookup_handler, providers_handler, push_handler, put_repository_handler, retry_handler,
    test_webhook_handler, version_handler,
};
use crate::server::ratelimit::{rate_limit_middleware, RateLimiter};
use crate::server::state::ServerState;

/// Origin application: application hosts are proxied before any
/// control-plane route or the rate limiter sees them
pub fn app(state: Arc<ServerState>, routing: Arc<OriginRouting>, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        // Repositories
        .route("/repos/{name}", put(put_repository_handler))
        .route("/repos/{name}/deploy", post(deploy_handler))
        .route("/repos/{name}/push", post(push_handler))
        .route(
            "/repos/{name}/webhooks",
            get(list_webhooks_handler).post(create_webhook_handler),
        )
        .route("/repos/{name}/webhooks/{id}/test", post(test_webhook_handler))
        // Deployments
        .route("/deployments", get(list_deployments_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/logs", get(deployment_logs_handler))
        .route("/deployments/{id}/cancel", post(cancel_handler))
        .route("/deployments/{id}/retry", post(retry_handler))
        // Tooling
        .route("/providers", get(providers_handler))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        // Not rate limited: the edge resolves every request through lookup
        .route("/lookup/{name}", get(lookup_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // State and middleware
        .with_state(state)
        .layer(middleware::from_fn_with_state(routing, subdomain_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Start the origin HTTP server
pub async fn serve(
    options: &ServerOptions,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ControlError>>, ControlError> {
    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ControlError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ControlError::ServerError(e.to_string()))
    });

    Ok(handle)
}
