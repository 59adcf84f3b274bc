//! Webhook delivery

use std::sync::Arc;
use std::time::Duration;

use api_models::TestDeliveryResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::deploy::supervisor::TaskSet;
use crate::errors::ControlError;
use crate::models::repository::Repository;
use crate::models::webhook::{Webhook, WebhookEvent};
use crate::store::Store;
use crate::webhooks::signing::{signature_header, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use crate::webhooks::ssrf::screen_url;
use crate::webhooks::Notifier;

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryRef {
    pub id: String,
    pub name: String,
    pub owner: String,
}

/// Body of every delivery
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub delivery_id: String,
    pub timestamp: DateTime<Utc>,
    pub repository: RepositoryRef,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(repository: &Repository, event: WebhookEvent, data: serde_json::Value) -> Self {
        Self {
            event,
            delivery_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            repository: RepositoryRef {
                id: repository.id.clone(),
                name: repository.name.clone(),
                owner: repository.owner.clone(),
            },
            data,
        }
    }
}

/// Client used for deliveries: no redirects, bounded time
pub fn delivery_client() -> Result<Client, ControlError> {
    Ok(Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(DELIVERY_TIMEOUT)
        .user_agent(concat!("shipyard-webhooks/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// POST one payload to an already screened URL
pub async fn deliver(
    client: &Client,
    url: Url,
    secret: Option<&SecretString>,
    payload: &WebhookPayload,
) -> Result<StatusCode, ControlError> {
    let body = serde_json::to_vec(payload)?;

    let mut request = client
        .post(url)
        .header(header::CONTENT_TYPE, "application/json")
        .header(DELIVERY_HEADER, &payload.delivery_id)
        .header(EVENT_HEADER, payload.event.as_str());
    if let Some(secret) = secret {
        request = request.header(
            SIGNATURE_HEADER,
            signature_header(secret.expose_secret().as_bytes(), &body),
        );
    }

    let response = request.body(body).send().await?;
    Ok(response.status())
}

pub struct WebhookDispatcher {
    store: Arc<Store>,
    client: Client,
    tasks: Arc<TaskSet>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<Store>, tasks: Arc<TaskSet>) -> Result<Self, ControlError> {
        Ok(Self {
            store,
            client: delivery_client()?,
            tasks,
        })
    }

    /// Schedule deliveries of `event` to every active subscriber. Returns the
    /// number of deliveries scheduled; blocked targets are skipped.
    pub async fn dispatch(
        &self,
        repository: &Repository,
        event: WebhookEvent,
        data: serde_json::Value,
    ) -> usize {
        let hooks: Vec<Webhook> = self
            .store
            .webhooks_for(&repository.id)
            .await
            .into_iter()
            .filter(|hook| hook.subscribes_to(event))
            .collect();

        let mut scheduled = 0;
        for hook in hooks {
            let url = match screen_url(&hook.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping webhook {} for {}: {}", hook.id, repository.name, e);
                    continue;
                }
            };

            let payload = WebhookPayload::new(repository, event, data.clone());
            let client = self.client.clone();
            self.tasks.spawn("webhook-delivery", async move {
                match deliver(&client, url, hook.secret.as_ref(), &payload).await {
                    Ok(status) if status.is_success() => {
                        debug!("Delivered {} to webhook {} ({})", payload.event, hook.id, status)
                    }
                    Ok(status) => warn!(
                        "Webhook {} answered {} for delivery {}",
                        hook.id, status, payload.delivery_id
                    ),
                    Err(e) => warn!(
                        "Webhook {} delivery {} failed: {}",
                        hook.id, payload.delivery_id, e
                    ),
                }
            });
            scheduled += 1;
        }

        if scheduled > 0 {
            info!("Scheduled {} {} deliveries for {}", scheduled, event, repository.name);
        }
        scheduled
    }

    /// Send a `ping` synchronously and report the outcome
    pub async fn test_delivery(&self, webhook_id: &str) -> Result<TestDeliveryResponse, ControlError> {
        let hook = self
            .store
            .webhook(webhook_id)
            .await
            .ok_or_else(|| ControlError::NotFound(format!("Webhook {}", webhook_id)))?;
        let repository = self
            .store
            .repository(&hook.repository_id)
            .await
            .ok_or_else(|| ControlError::NotFound(format!("Repository {}", hook.repository_id)))?;

        let payload = WebhookPayload::new(
            &repository,
            WebhookEvent::Ping,
            serde_json::json!({ "hook_id": hook.id, "message": "Shipyard test delivery" }),
        );

        let url = match screen_url(&hook.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Test delivery to webhook {} blocked: {}", hook.id, e);
                return Ok(TestDeliveryResponse {
                    success: false,
                    status_code: None,
                    delivery_id: payload.delivery_id,
                    error: Some(e.to_string()),
                });
            }
        };

        let report = match deliver(&self.client, url, hook.secret.as_ref(), &payload).await {
            Ok(status) => TestDeliveryResponse {
                success: status.is_success(),
                status_code: Some(status.as_u16()),
                delivery_id: payload.delivery_id,
                error: (!status.is_success()).then(|| format!("Endpoint answered {}", status)),
            },
            Err(e) => TestDeliveryResponse {
                success: false,
                status_code: None,
                delivery_id: payload.delivery_id,
                error: Some(e.to_string()),
            },
        };
        Ok(report)
    }
}

#[async_trait]
impl Notifier for WebhookDispatcher {
    async fn notify(&self, repository: &Repository, event: WebhookEvent, data: serde_json::Value) -> usize {
        self.dispatch(repository, event, data).await
    }
}
