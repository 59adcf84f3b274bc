use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use shipyard::deploy::fsm::DeploymentStatus;
use shipyard::models::deployment::Deployment;
use shipyard::models::webhook::{Webhook, WebhookEvent};
use shipyard::store::Store;

use crate::common::{harness, live_deployment, request, seed_repository, send, Harness};

/// Poll until the deployment reaches a terminal state
async fn settled(store: &Store, id: &str) -> Deployment {
    for _ in 0..250 {
        let deployment = store.deployment(id).await.unwrap();
        if deployment.status.is_terminal() {
            return deployment;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("deployment {id} did not settle");
}

async fn deploy(h: &Harness, repo: &str, actor: &str, body: Value) -> (StatusCode, Value) {
    let uri = format!("/repos/{}/deploy", repo);
    let (status, _, body) = send(&h.router, request(Method::POST, &uri, Some(actor), Some(body))).await;
    (status, body)
}

// ================================ REPOSITORIES ================================ //

#[tokio::test]
async fn test_register_repository() {
    let h = harness(100);
    let body = json!({"owner": "alice", "private": true, "defaultBranch": "trunk"});

    let (status, _, repo) = send(&h.router, request(Method::PUT, "/repos/shop", Some("alice"), Some(body.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repo["name"], "shop");
    assert_eq!(repo["owner"], "alice");
    assert_eq!(repo["private"], true);
    assert_eq!(repo["defaultBranch"], "trunk");

    // idempotent for the owner
    let (status, _, again) = send(&h.router, request(Method::PUT, "/repos/shop", Some("alice"), Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], repo["id"]);

    // another actor cannot claim it
    let takeover = json!({"owner": "mallory"});
    let (status, _, error) = send(&h.router, request(Method::PUT, "/repos/shop", Some("mallory"), Some(takeover))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["error"], "permission_denied");
}

#[tokio::test]
async fn test_register_requires_matching_actor() {
    let h = harness(100);
    let body = json!({"owner": "alice"});

    let (status, _, _) = send(&h.router, request(Method::PUT, "/repos/shop", None, Some(body.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(&h.router, request(Method::PUT, "/repos/shop", Some("bob"), Some(body.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, error) = send(&h.router, request(Method::PUT, "/repos/my%20shop", Some("alice"), Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation_error");
}

#[tokio::test]
async fn test_private_repository_is_hidden() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "vault", "alice", true).await;
    let deployment = live_deployment(&h.store, &repo, "https://vault.fly.dev").await;

    let uri = format!("/deployments/{}", deployment.id);
    let (status, _, _) = send(&h.router, request(Method::GET, &uri, Some("bob"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&h.router, request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, body) = send(&h.router, request(Method::GET, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = deploy(&h, "vault", "bob", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, list) = send(&h.router, request(Method::GET, "/deployments", Some("bob"), None)).await;
    assert_eq!(list["total"], 0);
    let (_, _, list) = send(&h.router, request(Method::GET, "/deployments", Some("alice"), None)).await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn test_public_repository_is_read_only_to_others() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    let deployment = live_deployment(&h.store, &repo, "https://shop.fly.dev").await;

    let uri = format!("/deployments/{}/logs", deployment.id);
    let (status, _, _) = send(&h.router, request(Method::GET, &uri, Some("bob"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = deploy(&h, "shop", "bob", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let uri = format!("/deployments/{}/cancel", deployment.id);
    let (status, _, _) = send(&h.router, request(Method::POST, &uri, Some("bob"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ================================ DEPLOYMENTS ================================= //

#[tokio::test]
async fn test_deploy_goes_live() {
    let h = harness(100);
    seed_repository(&h.store, "shop", "alice", false).await;
    let source = tempfile::tempdir_in(h.uploads.path()).unwrap();

    let (status, _, _) = send(&h.router, request(Method::GET, "/lookup/shop", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, pending) = deploy(
        &h,
        "shop",
        "alice",
        json!({"sourcePath": source.path().to_string_lossy()}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["triggeredBy"], "alice");

    let id = pending["id"].as_str().unwrap();
    let done = settled(&h.store, id).await;
    assert_eq!(done.status, DeploymentStatus::Success);
    assert_eq!(done.url.as_deref(), Some("https://shop.fly.dev"));
    assert!(done.completed_at.is_some());
    assert_eq!(h.adapter.deploys.load(Ordering::SeqCst), 1);
    // a caller-provided tree is never removed
    assert!(source.path().exists());

    let (status, _, found) = send(&h.router, request(Method::GET, "/lookup/shop", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["url"], "https://shop.fly.dev");
    assert_eq!(found["deploymentId"], id);

    let uri = format!("/deployments/{}/logs", id);
    let (_, _, logs) = send(&h.router, request(Method::GET, &uri, Some("alice"), None)).await;
    let lines: Vec<&str> = logs["logs"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert!(lines.contains(&"Provider: fly"));
    assert!(lines.contains(&"Deployed shop"));
}

#[tokio::test]
async fn test_failed_deploy_can_be_retried() {
    let h = harness(100);
    seed_repository(&h.store, "shop", "alice", false).await;
    let missing = h.uploads.path().join("never-extracted");

    let (status, pending) = deploy(&h, "shop", "alice", json!({"sourcePath": missing.to_string_lossy()})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = pending["id"].as_str().unwrap().to_string();
    let failed = settled(&h.store, &id).await;
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.url.is_none());
    assert_eq!(h.adapter.deploys.load(Ordering::SeqCst), 0);

    let uri = format!("/deployments/{}/retry", id);
    let (status, _, retried) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_ne!(retried["id"], id.as_str());
    assert_eq!(retried["status"], "pending");

    // the original record is untouched
    let original = h.store.deployment(&id).await.unwrap();
    assert_eq!(original.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_source_path_must_stay_in_uploads() {
    let h = harness(100);
    seed_repository(&h.store, "shop", "alice", false).await;

    let (status, error) = deploy(&h, "shop", "alice", json!({"sourcePath": "/etc"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["error"], "permission_denied");

    let climb = format!("{}/../../etc", h.uploads.path().display());
    let (status, error) = deploy(&h, "shop", "alice", json!({"sourcePath": climb})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation_error");

    assert!(h.store.list_deployments(&Default::default()).await.is_empty());
    assert_eq!(h.adapter.deploys.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_transitions_conflict() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    let live = live_deployment(&h.store, &repo, "https://shop.fly.dev").await;

    let uri = format!("/deployments/{}/retry", live.id);
    let (status, _, error) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "invalid_state");

    let uri = format!("/deployments/{}/cancel", live.id);
    let (status, _, _) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_pending_deployment() {
    let h = harness(100);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    let pending = h
        .store
        .create_deployment(Deployment::new(&repo, "abc1234", None, "alice"))
        .await
        .unwrap();

    let uri = format!("/deployments/{}/cancel", pending.id);
    let (status, _, body) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");

    let uri = format!("/deployments/{}/logs", pending.id);
    let (_, _, logs) = send(&h.router, request(Method::GET, &uri, None, None)).await;
    assert!(logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .any(|line| line.as_str().is_some_and(|l| l.contains("alice"))));
}

#[tokio::test]
async fn test_list_filters() {
    let h = harness(100);
    let shop = seed_repository(&h.store, "shop", "alice", false).await;
    let blog = seed_repository(&h.store, "blog", "alice", false).await;
    live_deployment(&h.store, &shop, "https://shop.fly.dev").await;
    live_deployment(&h.store, &blog, "https://blog.fly.dev").await;
    h.store
        .create_deployment(Deployment::new(&shop, "abc1234", None, "alice"))
        .await
        .unwrap();

    let (_, _, all) = send(&h.router, request(Method::GET, "/deployments", None, None)).await;
    assert_eq!(all["total"], 3);
    let (_, _, shop_only) = send(&h.router, request(Method::GET, "/deployments?repo=shop", None, None)).await;
    assert_eq!(shop_only["total"], 2);
    let (_, _, live) = send(&h.router, request(Method::GET, "/deployments?status=success", None, None)).await;
    assert_eq!(live["total"], 2);
    let (_, _, one) = send(&h.router, request(Method::GET, "/deployments?limit=1", None, None)).await;
    assert_eq!(one["total"], 1);

    let (status, _, _) = send(&h.router, request(Method::GET, "/deployments?status=exploded", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(&h.router, request(Method::GET, "/deployments?repo=ghost", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_push_outside_default_branch_does_not_deploy() {
    let h = harness(100);
    seed_repository(&h.store, "shop", "alice", false).await;

    let body = json!({"commit": "abc1234", "branch": "feature/cart"});
    let (status, _, response) = send(&h.router, request(Method::POST, "/repos/shop/push", Some("bob"), Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["webhooksScheduled"], 0);
    assert!(response["deployment"].is_null());
    assert!(h.store.list_deployments(&Default::default()).await.is_empty());
}

// ================================ WEBHOOKS ==================================== //

#[tokio::test]
async fn test_webhook_registration() {
    let h = harness(100);
    seed_repository(&h.store, "shop", "alice", false).await;

    let blocked = json!({"url": "http://169.254.169.254/latest/meta-data", "events": ["push"]});
    let (status, _, error) = send(&h.router, request(Method::POST, "/repos/shop/webhooks", Some("alice"), Some(blocked))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "ssrf_blocked");

    let ping = json!({"url": "https://hooks.example.com/shipyard", "events": ["ping"]});
    let (status, _, _) = send(&h.router, request(Method::POST, "/repos/shop/webhooks", Some("alice"), Some(ping))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let valid = json!({
        "url": "https://hooks.example.com/shipyard",
        "secret": "whsec_abcd1234",
        "events": ["push", "deployment.succeeded"],
    });
    let (status, _, created) = send(&h.router, request(Method::POST, "/repos/shop/webhooks", Some("alice"), Some(valid.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["active"], true);
    assert_eq!(created["events"], json!(["push", "deployment.succeeded"]));

    let (status, _, _) = send(&h.router, request(Method::POST, "/repos/shop/webhooks", Some("bob"), Some(valid))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, list) = send(&h.router, request(Method::GET, "/repos/shop/webhooks", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let hook = &list["webhooks"][0];
    assert_eq!(hook["hasSecret"], true);
    assert_eq!(hook["secretHint"], "****1234");
    assert!(hook.get("secret").is_none());
    assert!(!list.to_string().contains("whsec_abcd1234"));

    let (status, _, _) = send(&h.router, request(Method::GET, "/repos/shop/webhooks", Some("bob"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_test_delivery_reports_blocked_target() {
    let h = harness(100);
    let shop = seed_repository(&h.store, "shop", "alice", false).await;
    let blog = seed_repository(&h.store, "blog", "alice", false).await;
    // stored before screening existed
    let hook = h
        .store
        .insert_webhook(Webhook::new(&shop.id, "http://127.0.0.1:1/hook", None, vec![WebhookEvent::Push]))
        .await
        .unwrap();

    let uri = format!("/repos/shop/webhooks/{}/test", hook.id);
    let (status, _, report) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["success"], false);
    assert!(report["statusCode"].is_null());
    assert!(report["error"].is_string());

    // hook ids are scoped to their repository
    let uri = format!("/repos/{}/webhooks/{}/test", blog.name, hook.id);
    let (status, _, _) = send(&h.router, request(Method::POST, &uri, Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ================================ SERVICE ===================================== //

#[tokio::test]
async fn test_rate_limit() {
    let h = harness(2);

    for _ in 0..2 {
        let (status, headers, _) = send(&h.router, request(Method::GET, "/providers", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ratelimit-limit"], "2");
    }
    let (status, headers, body) = send(&h.router, request(Method::GET, "/providers", None, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
    let retry_after: u64 = headers["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1);

    // health checks are never throttled
    let (status, _, _) = send(&h.router, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_lookup_is_not_rate_limited() {
    let h = harness(2);
    let repo = seed_repository(&h.store, "shop", "alice", false).await;
    live_deployment(&h.store, &repo, "https://shop.fly.dev").await;

    for _ in 0..5 {
        let (status, headers, found) = send(&h.router, request(Method::GET, "/lookup/shop", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["url"], "https://shop.fly.dev");
        assert!(!headers.contains_key("x-ratelimit-limit"));
    }
    let (status, _, _) = send(&h.router, request(Method::GET, "/providers", None, None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_providers_and_version() {
    let h = harness(100);

    let (status, _, providers) = send(&h.router, request(Method::GET, "/providers", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(providers[0]["provider"], "fly");
    assert_eq!(providers[0]["installed"], true);

    let (status, _, version) = send(&h.router, request(Method::GET, "/version", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(version["version"].is_string());
}
