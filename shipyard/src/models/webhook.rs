//! Webhook subscription model

use std::fmt;
use std::str::FromStr;

use api_models::WebhookResponse;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ControlError;

/// Lifecycle events a webhook can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "deployment.created")]
    DeploymentCreated,
    #[serde(rename = "deployment.succeeded")]
    DeploymentSucceeded,
    #[serde(rename = "deployment.failed")]
    DeploymentFailed,
    #[serde(rename = "pull_request.opened")]
    PullRequestOpened,
    #[serde(rename = "pull_request.merged")]
    PullRequestMerged,
    /// Synthetic event of test deliveries; never subscribed to
    #[serde(rename = "ping")]
    Ping,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Push => "push",
            WebhookEvent::DeploymentCreated => "deployment.created",
            WebhookEvent::DeploymentSucceeded => "deployment.succeeded",
            WebhookEvent::DeploymentFailed => "deployment.failed",
            WebhookEvent::PullRequestOpened => "pull_request.opened",
            WebhookEvent::PullRequestMerged => "pull_request.merged",
            WebhookEvent::Ping => "ping",
        }
    }
}

impl FromStr for WebhookEvent {
    type Err = ControlError;

    /// Subscribable events only; `ping` is reserved for test deliveries
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(WebhookEvent::Push),
            "deployment.created" => Ok(WebhookEvent::DeploymentCreated),
            "deployment.succeeded" => Ok(WebhookEvent::DeploymentSucceeded),
            "deployment.failed" => Ok(WebhookEvent::DeploymentFailed),
            "pull_request.opened" => Ok(WebhookEvent::PullRequestOpened),
            "pull_request.merged" => Ok(WebhookEvent::PullRequestMerged),
            other => Err(ControlError::ValidationError(format!(
                "Unknown webhook event: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository's webhook subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub repository_id: String,
    pub url: String,

    /// Write-once shared secret. Serialized only into the store snapshot.
    #[serde(
        default,
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub secret: Option<SecretString>,

    pub events: Vec<WebhookEvent>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Webhook {
    pub fn new(
        repository_id: impl Into<String>,
        url: impl Into<String>,
        secret: Option<String>,
        events: Vec<WebhookEvent>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository_id.into(),
            url: url.into(),
            secret: secret.map(SecretString::from),
            events,
            active: true,
        }
    }

    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.active && self.events.contains(&event)
    }

    pub fn to_response(&self) -> WebhookResponse {
        WebhookResponse {
            id: self.id.clone(),
            url: self.url.clone(),
            events: self.events.iter().map(|e| e.as_str().to_string()).collect(),
            active: self.active,
            has_secret: self.secret.is_some(),
            secret_hint: self.secret_hint(),
        }
    }

    /// Last four characters of the secret, for display
    pub fn secret_hint(&self) -> Option<String> {
        self.secret.as_ref().map(|secret| {
            let secret = secret.expose_secret();
            let tail: String = secret
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{}", tail)
        })
    }
}

fn serialize_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}
