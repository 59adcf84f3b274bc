use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;
use url::Url;

use shipyard::cache::subdomain::SubdomainCache;
use shipyard::routing::edge::{self, EdgeState};
use shipyard::routing::proxy::Proxy;
use shipyard::routing::resolver::StoreResolver;
use shipyard::routing::SubdomainRouter;
use shipyard::store::Store;

use crate::common::{harness, live_deployment, request, reserved_labels, seed_repository, send, spawn_backend};

fn app_request(host: &str, uri: &str) -> axum::http::Request<axum::body::Body> {
    let mut request = request(Method::GET, uri, None, None);
    request.headers_mut().insert("host", host.parse().unwrap());
    request
}

#[tokio::test]
async fn test_application_host_is_proxied() {
    let (addr, seen) = spawn_backend().await;
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    live_deployment(&h.store, &repo, &format!("http://{}", addr)).await;

    let mut request = app_request("shop.example.com", "/cart/items?page=2&sort=asc");
    let headers = request.headers_mut();
    headers.insert("x-forwarded-proto", "https".parse().unwrap());
    headers.insert("cf-connecting-ip", "203.0.113.9".parse().unwrap());
    headers.insert("cf-ray", "8a1b2c".parse().unwrap());
    headers.insert("x-edge-location", "fra".parse().unwrap());
    headers.insert("cdn-loop", "shipyard".parse().unwrap());
    headers.insert("x-request-id", "req-1".parse().unwrap());

    let (status, headers, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers["x-backend"], "loopback");
    assert!(!headers.contains_key("connection"));
    assert_eq!(body, json!("GET /cart/items?page=2&sort=asc"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let inbound = &seen[0];
    assert_eq!(inbound.method, Method::GET);
    assert_eq!(inbound.path_and_query, "/cart/items?page=2&sort=asc");
    assert_eq!(inbound.headers["host"], addr.to_string().as_str());
    assert_eq!(inbound.headers["x-forwarded-host"], "shop.example.com");
    assert_eq!(inbound.headers["x-forwarded-proto"], "https");
    assert_eq!(inbound.headers["x-request-id"], "req-1");
    for stripped in ["cf-connecting-ip", "cf-ray", "x-edge-location", "cdn-loop"] {
        assert!(!inbound.headers.contains_key(stripped), "{stripped} reached the backend");
    }
}

#[tokio::test]
async fn test_request_body_is_streamed_to_backend() {
    let (addr, seen) = spawn_backend().await;
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    live_deployment(&h.store, &repo, &format!("http://{}", addr)).await;

    let mut request = request(Method::POST, "/orders", None, Some(json!({"sku": "A-1"})));
    request.headers_mut().insert("host", "shop.example.com".parse().unwrap());
    let (status, _, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!("POST /orders"));
    assert_eq!(seen.lock().unwrap()[0].body, r#"{"sku":"A-1"}"#);
}

#[tokio::test]
async fn test_resolution_is_cached() {
    let (addr, _seen) = spawn_backend().await;
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    live_deployment(&h.store, &repo, &format!("http://{}", addr)).await;

    assert!(h.subdomains.is_empty());
    let (status, _, _) = send(&h.router, app_request("Shop.Example.com:443", "/")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(h.subdomains.get("shop"), Some(format!("http://{}", addr)));
}

#[tokio::test]
async fn test_unknown_application_is_not_found() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "idle", "alice", false).await;

    // registered but never deployed
    let (status, _, body) = send(&h.router, app_request("idle.example.com", "/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert_eq!(repo.name, "idle");

    let (status, _, _) = send(&h.router, app_request("ghost.example.com", "/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.subdomains.is_empty());
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    // nothing listens on the discard port
    live_deployment(&h.store, &repo, "http://127.0.0.1:9").await;

    let response = send(&h.router, app_request("shop.example.com", "/")).await;
    assert_eq!(response.0, StatusCode::BAD_GATEWAY);
    assert_eq!(response.2, json!("Bad Gateway"));
}

#[tokio::test]
async fn test_reserved_hosts_reach_control_plane() {
    let h = harness(100);
    for host in ["api.example.com", "www.example.com", "example.com", "127.0.0.1:8080"] {
        let (status, _, body) = send(&h.router, app_request(host, "/health")).await;
        assert_eq!(status, StatusCode::OK, "{host}");
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "shipyard");
    }
}

// ================================ EDGE ======================================== //

fn edge_app(store: Arc<Store>, origin: &str) -> (axum::Router, Arc<SubdomainCache>) {
    let cache = Arc::new(SubdomainCache::new(Duration::from_secs(60)));
    let state = Arc::new(EdgeState {
        router: SubdomainRouter::new(cache.clone(), Arc::new(StoreResolver::new(store)), reserved_labels()),
        proxy: Proxy::new(Duration::from_secs(5)).unwrap(),
        origin: Url::parse(origin).unwrap(),
    });
    (edge::app(state), cache)
}

#[tokio::test]
async fn test_edge_passthrough_preserves_host() {
    let (origin, seen) = spawn_backend().await;
    let store = Arc::new(Store::in_memory());
    let (app, _) = edge_app(store, &format!("http://{}", origin));

    let mut request = app_request("api.example.com", "/deployments?limit=5");
    request.headers_mut().insert("cf-ray", "8a1b2c".parse().unwrap());
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!("GET /deployments?limit=5"));
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].headers["host"], "api.example.com");
    assert_eq!(seen[0].headers["cf-ray"], "8a1b2c");
    assert!(!seen[0].headers.contains_key("x-forwarded-host"));
}

#[tokio::test]
async fn test_edge_routes_application_to_backend() {
    let (origin, origin_seen) = spawn_backend().await;
    let (backend, backend_seen) = spawn_backend().await;

    let store = Arc::new(Store::in_memory());
    let repo = seed_repository(&store, "shop", "alice", false).await;
    live_deployment(&store, &repo, &format!("http://{}", backend)).await;
    let (app, cache) = edge_app(store, &format!("http://{}", origin));

    let (status, _, _) = send(&app, app_request("shop.example.com", "/")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(backend_seen.lock().unwrap().len(), 1);
    assert!(origin_seen.lock().unwrap().is_empty());
    assert_eq!(cache.len(), 1);

    let (status, _, _) = send(&app, app_request("ghost.example.com", "/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(origin_seen.lock().unwrap().is_empty());
}
