//! Subdomain routing
//!
//! The first label of a wildcard-domain host names an application. Both
//! the edge and the origin resolve it through a TTL cache backed by an
//! authoritative [`Resolver`], then proxy the request to the backend.

pub mod edge;
pub mod origin;
pub mod proxy;
pub mod resolver;

use std::sync::Arc;

use api_models::ErrorResponse;
use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};
use url::Url;

use crate::cache::subdomain::SubdomainCache;
use crate::errors::ControlError;
use crate::routing::proxy::{HostMode, Proxy};
use crate::routing::resolver::Resolver;

/// Where a host's traffic goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRoute {
    /// Not an application host; handled by the control plane itself
    Passthrough,

    /// Application subdomain
    Application(String),
}

/// Classify a `Host` value. Ports are ignored and names compared lowercase.
pub fn classify_host(host: &str, reserved_labels: &[String]) -> HostRoute {
    let host = strip_port(host.trim()).trim_end_matches('.').to_lowercase();
    if host.trim_matches(['[', ']']).parse::<std::net::IpAddr>().is_ok() {
        return HostRoute::Passthrough;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return HostRoute::Passthrough;
    }

    let first = labels[0];
    if reserved_labels.iter().any(|reserved| reserved == first) {
        return HostRoute::Passthrough;
    }
    HostRoute::Application(first.to_string())
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literals keep their colons
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Host of an inbound request: the `Host` header, else the URI authority
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
}

/// Cache in front of an authoritative resolver
pub struct SubdomainRouter {
    cache: Arc<SubdomainCache>,
    resolver: Arc<dyn Resolver>,
    reserved_labels: Vec<String>,
}

impl SubdomainRouter {
    pub fn new(cache: Arc<SubdomainCache>, resolver: Arc<dyn Resolver>, reserved_labels: Vec<String>) -> Self {
        Self {
            cache,
            resolver,
            reserved_labels,
        }
    }

    pub fn cache(&self) -> &Arc<SubdomainCache> {
        &self.cache
    }

    pub fn classify(&self, host: &str) -> HostRoute {
        classify_host(host, &self.reserved_labels)
    }

    /// Backend URL for `name`, from the cache or the resolver
    pub async fn resolve(&self, name: &str) -> Result<Option<String>, ControlError> {
        if let Some(url) = self.cache.get(name) {
            debug!("Subdomain cache hit: {}", name);
            return Ok(Some(url));
        }

        let Some(found) = self.resolver.lookup(name).await? else {
            debug!("No live deployment for {}", name);
            return Ok(None);
        };
        self.cache.insert(name, found.url.clone());
        Ok(Some(found.url))
    }
}

/// Resolve `name` and proxy `request` to its backend
pub async fn serve_application(router: &SubdomainRouter, proxy: &Proxy, name: &str, request: Request) -> Response {
    let backend = match router.resolve(name).await {
        Ok(Some(backend)) => backend,
        Ok(None) => return not_found(name),
        Err(e) => {
            warn!("Lookup of {} failed: {}", name, e);
            return proxy::bad_gateway();
        }
    };

    let target = match Url::parse(&backend) {
        Ok(target) => target,
        Err(e) => {
            warn!("Invalid backend URL for {}: {} ({})", name, backend, e);
            return proxy::bad_gateway();
        }
    };
    proxy.forward(request, &target, HostMode::Rewrite).await
}

fn not_found(name: &str) -> Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message: format!("No live deployment for {}", name),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
