//! Server state

use std::sync::Arc;

use crate::deploy::engine::Engine;
use crate::store::Store;
use crate::webhooks::dispatcher::WebhookDispatcher;

/// State shared across control-plane handlers
pub struct ServerState {
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl ServerState {
    pub fn new(store: Arc<Store>, engine: Arc<Engine>, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self {
            store,
            engine,
            dispatcher,
        }
    }
}
