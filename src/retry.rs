//! Bounded exponential backoff for transient failures
//!
//! Background sync operations never surface transient store hiccups to the
//! caller; they retry a fixed number of times and then leave the target
//! stale. Absolute-value sync writes self-correct on the next event, so an
//! exhausted retry is logged and dropped, not escalated.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::SyncError;

/// Retry policy: bounded attempts, doubling delay
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Run an async operation, retrying transient failures per the policy.
///
/// Permanent errors (permission denied, serialization) return immediately.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                warn!(op = %label, attempts = attempt, error = %e, "Retries exhausted");
                return Err(e);
            }
            Err(e) => {
                warn!(op = %label, attempt = attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}
