//! Transport retry with failure-kind-specific escalating backoff.

use std::future::Future;
use std::time::Duration;

use crate::client::ApiFailure;

/// Base delay per failure kind; the actual delay scales linearly with the
/// attempt number. Rate limits wait longest since the window has to pass.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub rate_limited: Duration,
    pub server_error: Duration,
    pub timeout: Duration,
    pub connection: Duration,
    pub fallback: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            rate_limited: Duration::from_secs(30),
            server_error: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
            connection: Duration::from_secs(10),
            fallback: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// All-zero delays, for tests.
    pub fn none() -> Self {
        Self {
            rate_limited: Duration::ZERO,
            server_error: Duration::ZERO,
            timeout: Duration::ZERO,
            connection: Duration::ZERO,
            fallback: Duration::ZERO,
        }
    }

    /// Delay before the retry following `attempt` (1-based), or `None` when
    /// the failure must not be retried.
    pub fn delay_for(&self, failure: &ApiFailure, attempt: u32) -> Option<Duration> {
        if failure.is_fatal() {
            return None;
        }
        let base = match failure {
            ApiFailure::RateLimited => self.rate_limited,
            ApiFailure::ServerError { .. } => self.server_error,
            ApiFailure::Timeout => self.timeout,
            ApiFailure::Connection(_) => self.connection,
            _ => self.fallback,
        };
        Some(base * attempt)
    }
}

/// Run `op` up to `max_attempts` times, sleeping per `policy` between
/// attempts. Fatal failures return immediately.
pub async fn retry<T, F, Fut>(
    max_attempts: u32,
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, ApiFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiFailure>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let Some(delay) = policy.delay_for(&failure, attempt) else {
                    return Err(failure);
                };
                if attempt >= max_attempts {
                    return Err(failure);
                }
                tracing::debug!(attempt, error = %failure, delay_ms = delay.as_millis() as u64, "retrying call");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
