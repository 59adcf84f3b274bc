//! Supervised background tasks

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The set of in-flight pipeline runs and webhook deliveries.
///
/// Tasks are detached from the request that started them but owned by the
/// application, so shutdown can wait for them instead of dropping them.
pub struct TaskSet {
    tasks: Mutex<JoinSet<()>>,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn `task`, reaping any tasks that already finished
    pub fn spawn<F>(&self, name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!("Background task panicked: {}", e);
            }
        }
        debug!("Spawning background task: {}", name);
        tasks.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for running tasks up to `max_delay`, then abort the rest
    pub async fn shutdown(&self, max_delay: Duration) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }

        info!("Waiting for {} background tasks...", tasks.len());
        let drain = async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Background task panicked: {}", e);
                }
            }
        };

        if tokio::time::timeout(max_delay, drain).await.is_err() {
            warn!("Background tasks still running after {:?}, aborting", max_delay);
            tasks.abort_all();
        }
    }
}
