//! Small shared utilities: retry backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

const INITIAL_DELAY_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.0;
/// External-call retries are capped at 3 s per attempt delay (§7).
const MAX_DELAY: Duration = Duration::from_secs(3);

/// Exponential backoff with jitter, capped at [`MAX_DELAY`]. Attempt 0
/// (the first try) has no delay.
pub fn backoff(attempt: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (INITIAL_DELAY_MS as f64 * exp) as u64;
    let jitter = rand::rng().random_range(0.9..1.1);
    let delay = Duration::from_millis((base as f64 * jitter) as u64);
    delay.min(MAX_DELAY)
}

/// Retry an external call up to `max_attempts` times with capped
/// exponential backoff between attempts (§7's "External-call error"
/// policy: retried with exponential backoff capped at 3s and 3 attempts).
pub async fn retry_external_call<T, F, Fut>(max_attempts: u64, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = backoff(attempt);
            debug!(attempt, ?delay, "retrying external call");
            tokio::time::sleep(delay).await;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::ExternalCall("retries exhausted".to_string())))
}
