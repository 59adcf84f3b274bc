//! Origin-side subdomain routing

use std::sync::Arc;

use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use crate::routing::proxy::Proxy;
use crate::routing::{request_host, serve_application, HostRoute, SubdomainRouter};

/// Router and proxy of the origin layer
pub struct OriginRouting {
    pub router: SubdomainRouter,
    pub proxy: Proxy,
}

impl OriginRouting {
    pub fn new(router: SubdomainRouter, proxy: Proxy) -> Self {
        Self { router, proxy }
    }
}

/// Application hosts are proxied; everything else continues into the
/// control-plane routes
pub async fn subdomain_middleware(
    State(routing): State<Arc<OriginRouting>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request_host(request.headers(), request.uri()).unwrap_or_default();
    match routing.router.classify(&host) {
        HostRoute::Passthrough => next.run(request).await,
        HostRoute::Application(name) => {
            serve_application(&routing.router, &routing.proxy, &name, request).await
        }
    }
}
