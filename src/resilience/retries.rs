//! Retry logic.
//!
//! # Responsibilities
//! - Determine if request is retryable (idempotent methods only)
//! - Execute retries with exponential backoff + jitter
//! - Bound the number of retries so a dead backend is never hammered
//!
//! # Design Decisions
//! - Never retry POST/PUT/DELETE/PATCH (non-idempotent)
//! - Only transport failures are retried; any HTTP status is a final answer

use reqwest::Method;
use std::future::Future;

use crate::config::RetryConfig;
use crate::error::SessionResult;
use crate::observability::metrics;
use crate::resilience::backoff::retry_delay;

/// Whether a method may be sent twice without changing server state.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Run `operation`, retrying transient failures of idempotent requests.
pub async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    method: &Method,
    mut operation: F,
) -> SessionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<T>>,
{
    let retryable = config.enabled && is_idempotent(method);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable && e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let delay = retry_delay(attempt, config);
                tracing::warn!(
                    %method,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transport failure, retrying"
                );
                metrics::record_transport_retry();
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
