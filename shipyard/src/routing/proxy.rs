//! Streaming reverse proxy

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use futures::TryStreamExt;
use reqwest::{redirect, Client};
use tracing::{debug, warn};
use url::Url;

use crate::errors::ControlError;

/// Connection-management headers never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const EDGE_PREFIXES: &[&str] = &["cf-", "x-edge-"];
const EDGE_HEADERS: &[&str] = &["cdn-loop", "x-forwarded-host"];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers identifying the edge that must not reach a backend
fn is_edge_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    EDGE_HEADERS.contains(&name) || EDGE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// How the outbound `Host` is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// Backend's own host, original host in `X-Forwarded-Host`
    Rewrite,

    /// Inbound host kept, for passthrough to the primary origin
    Preserve,
}

/// Generic 502; upstream error text is never exposed
pub fn bad_gateway() -> Response {
    let mut response = Response::new(Body::from("Bad Gateway"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// `target` with the inbound path and query
pub fn target_url(target: &Url, path_and_query: &str) -> Result<Url, ControlError> {
    let base = target.as_str().trim_end_matches('/');
    Url::parse(&format!("{}{}", base, path_and_query))
        .map_err(|e| ControlError::ValidationError(format!("Invalid proxy target: {}", e)))
}

pub struct Proxy {
    client: Client,
}

impl Proxy {
    pub fn new(timeout: Duration) -> Result<Self, ControlError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Forward `request` to `target`. Any failure becomes a 502.
    pub async fn forward(&self, request: Request, target: &Url, mode: HostMode) -> Response {
        match self.try_forward(request, target, mode).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Proxy to {} failed: {}", target, e);
                bad_gateway()
            }
        }
    }

    async fn try_forward(&self, request: Request, target: &Url, mode: HostMode) -> Result<Response, ControlError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = target_url(target, path_and_query)?;

        let inbound_host = crate::routing::request_host(&parts.headers, &parts.uri);
        let proto = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| parts.uri.scheme_str().unwrap_or("http").to_string());

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if name == header::HOST || is_hop_by_hop(name) {
                continue;
            }
            if mode == HostMode::Rewrite && is_edge_header(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        match mode {
            HostMode::Rewrite => {
                let authority = match (url.host_str(), url.port()) {
                    (Some(host), Some(port)) => format!("{}:{}", host, port),
                    (Some(host), None) => host.to_string(),
                    (None, _) => return Err(ControlError::ValidationError(format!("Proxy target has no host: {}", url))),
                };
                headers.insert(header::HOST, header_value(&authority)?);
                if let Some(host) = &inbound_host {
                    headers.insert("x-forwarded-host", header_value(host)?);
                }
                headers.insert("x-forwarded-proto", header_value(&proto)?);
            }
            HostMode::Preserve => {
                if let Some(host) = &inbound_host {
                    headers.insert(header::HOST, header_value(host)?);
                }
            }
        }

        debug!("Proxying {} {} -> {}", parts.method, path_and_query, url);
        let mut outbound = self.client.request(parts.method, url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = outbound.send().await?;

        let mut response = axum::http::Response::builder().status(upstream.status());
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if is_hop_by_hop(name) {
                    continue;
                }
                response_headers.append(name.clone(), value.clone());
            }
        }

        let stream = upstream.bytes_stream().map_err(std::io::Error::other);
        response
            .body(Body::from_stream(stream))
            .map_err(|e| ControlError::Internal(format!("Failed to build proxied response: {}", e)))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ControlError> {
    HeaderValue::from_str(value)
        .map_err(|e| ControlError::ValidationError(format!("Invalid header value {}: {}", value, e)))
}
