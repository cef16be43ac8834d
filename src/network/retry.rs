//! Retry-then-timeout policy for upstream calls
//!
//! Every attempt is bounded by `timeout`. Only transient failures
//! (timeouts, connection errors) are retried; anything else is returned
//! immediately since repeating it would give the same answer.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::types::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Run `op` under `policy`, returning the last error once attempts run out
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = SyncError::Internal(format!("{} was never attempted", operation));

    for attempt in 1..=attempts {
        let err = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => SyncError::Timeout(format!(
                "{} timed out after {}ms",
                operation,
                policy.timeout.as_millis()
            )),
        };

        if attempt < attempts {
            warn!(operation, attempt, max_attempts = attempts, error = %err, "Retrying upstream call");
            tokio::time::sleep(policy.delay).await;
        }
        last_error = err;
    }

    Err(last_error)
}
