//! Sweeper worker for expired cache entries and rate-limit windows

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::subdomain::SubdomainCache;
use crate::server::ratelimit::RateLimiter;

/// Anything holding entries that expire without being read
pub trait Sweep: Send + Sync {
    /// Drop expired entries and return how many were removed
    fn sweep(&self) -> usize;
}

impl Sweep for SubdomainCache {
    fn sweep(&self) -> usize {
        SubdomainCache::sweep(self)
    }
}

impl Sweep for RateLimiter {
    fn sweep(&self) -> usize {
        RateLimiter::sweep(self)
    }
}

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Run the sweeper worker over named `targets`
pub async fn run<S, F>(
    options: &Options,
    targets: Vec<(&'static str, Arc<dyn Sweep>)>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        for (name, target) in &targets {
            let removed = target.sweep();
            if removed > 0 {
                debug!("Swept {} expired entries from {}", removed, name);
            }
        }
    }
}
