//! Shipyard control plane library
//!
//! Deployment orchestration against hosting providers and subdomain routing
//! of deployed applications.

pub mod app;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod providers;
pub mod routing;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhooks;
pub mod workers;
