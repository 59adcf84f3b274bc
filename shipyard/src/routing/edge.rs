//! Edge layer
//!
//! First point of contact for the wildcard domain. Application hosts are
//! resolved through a short-TTL cache and the origin's lookup endpoint;
//! all other traffic is forwarded unmodified to the primary origin.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::Url;

use crate::app::options::ServerOptions;
use crate::errors::ControlError;
use crate::routing::proxy::{HostMode, Proxy};
use crate::routing::{request_host, serve_application, HostRoute, SubdomainRouter};

pub struct EdgeState {
    pub router: SubdomainRouter,
    pub proxy: Proxy,

    /// Primary origin for passthrough traffic
    pub origin: Url,
}

async fn edge_handler(State(state): State<Arc<EdgeState>>, request: Request) -> Response {
    let host = request_host(request.headers(), request.uri()).unwrap_or_default();
    match state.router.classify(&host) {
        HostRoute::Passthrough => state.proxy.forward(request, &state.origin, HostMode::Preserve).await,
        HostRoute::Application(name) => serve_application(&state.router, &state.proxy, &name, request).await,
    }
}

pub fn app(state: Arc<EdgeState>) -> Router {
    Router::new()
        .fallback(edge_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the edge HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<EdgeState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ControlError>>, ControlError> {
    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting edge server on {} (origin {})", addr, state.origin);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ControlError::ServerError(e.to_string()))?;
    let app = app(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ControlError::ServerError(e.to_string()))
    });

    Ok(handle)
}
