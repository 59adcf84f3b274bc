//! Webhook notifications
//!
//! Lifecycle events are fanned out to repository subscriptions through the
//! [`Notifier`] seam. Deliveries are screened, signed and fire-and-forget.

pub mod dispatcher;
pub mod signing;
pub mod ssrf;

use async_trait::async_trait;

use crate::models::repository::Repository;
use crate::models::webhook::WebhookEvent;

/// Best-effort event sink. Never fails; returns the number of deliveries
/// scheduled.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, repository: &Repository, event: WebhookEvent, data: serde_json::Value) -> usize;
}
