//! Polling a remote deployment until it settles

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ControlError;

/// Polling options
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Settled(T),
    TimedOut,
}

/// Call `check` every `interval` until it yields a value or `max_wait`
/// elapses. Errors from `check` are logged and the next attempt proceeds.
pub async fn poll_until<T, C, CF, S, SF>(options: &Options, mut check: C, sleep_fn: S) -> PollOutcome<T>
where
    C: FnMut() -> CF,
    CF: Future<Output = Result<Option<T>, ControlError>>,
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match check().await {
            Ok(Some(value)) => return PollOutcome::Settled(value),
            Ok(None) => debug!("Poll attempt {} not settled yet", attempt),
            Err(e) => warn!("Poll attempt {} failed: {}", attempt, e),
        }

        if started.elapsed() + options.interval > options.max_wait {
            return PollOutcome::TimedOut;
        }
        sleep_fn(options.interval).await;
    }
}
