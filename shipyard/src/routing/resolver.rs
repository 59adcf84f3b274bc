//! Authoritative backend lookups

use std::sync::Arc;

use api_models::LookupResponse;
use async_trait::async_trait;

use crate::errors::ControlError;
use crate::http::client::HttpClient;
use crate::store::Store;

/// Maps an application name to the URL of its live deployment
#[async_trait]
pub trait Resolver: Send + Sync {
    /// `Ok(None)` when the application is unknown or has nothing live
    async fn lookup(&self, name: &str) -> Result<Option<LookupResponse>, ControlError>;
}

/// Origin lookup straight from the store
pub struct StoreResolver {
    store: Arc<Store>,
}

impl StoreResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resolver for StoreResolver {
    async fn lookup(&self, name: &str) -> Result<Option<LookupResponse>, ControlError> {
        let Some((repository, deployment)) = self.store.lookup(name).await else {
            return Ok(None);
        };
        Ok(deployment.url.map(|url| LookupResponse {
            name: repository.name,
            url,
            deployment_id: deployment.id,
        }))
    }
}

/// Edge lookup through the origin's `/lookup/{name}`
pub struct OriginResolver {
    client: HttpClient,
}

impl OriginResolver {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for OriginResolver {
    async fn lookup(&self, name: &str) -> Result<Option<LookupResponse>, ControlError> {
        self.client
            .get_optional(&format!("/lookup/{}", name))
            .await
    }
}
