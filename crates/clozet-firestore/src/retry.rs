//! Transient-failure retries for Firestore calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info_span, warn, Instrument};

use crate::error::FirestoreResult;
use crate::metrics::record_retry;

/// Backoff policy: `base * 2^attempt`, capped, with full jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

fn env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

impl RetryConfig {
    /// `FIRESTORE_MAX_RETRIES`, `FIRESTORE_RETRY_BASE_MS`, `FIRESTORE_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_u64("FIRESTORE_MAX_RETRIES")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
            base_delay: env_u64("FIRESTORE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: env_u64("FIRESTORE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Sleep before retry number `attempt` (0-based). A server-provided
    /// back-off wins over the computed one.
    fn backoff(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(ms) = retry_after_ms {
            return Duration::from_millis(ms);
        }

        let base = self.base_delay.as_millis() as u64;
        let ceiling = base
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(self.max_delay.as_millis() as u64);
        let jittered = rand::rng().random_range(0..=ceiling);
        Duration::from_millis(jittered.max(base))
    }
}

/// Run `op`, retrying transport errors, 429 and 5xx. Anything else
/// (auth, 4xx, lost preconditions) comes back on the first failure.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("firestore_attempt", operation, attempt = attempt + 1);
        let err = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = config.backoff(attempt, err.retry_after_ms());
        warn!(
            operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient Firestore failure, retrying"
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FirestoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_server_backoff_wins() {
        let delay = RetryConfig::default().backoff(0, Some(2000));
        assert_eq!(delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_stays_between_base_and_cap() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(2),
        };
        for attempt in [0, 1, 10, 64, 200] {
            let delay = config.backoff(attempt, None);
            assert!(delay >= Duration::from_secs(1), "attempt {}", attempt);
            assert!(delay <= Duration::from_secs(2), "attempt {}", attempt);
        }
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "get_job", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FirestoreError::from_http_status(503, "unavailable"))
            } else {
                Ok("job")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "job");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: FirestoreResult<()> = with_retry(&fast(), "query_jobs", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FirestoreError::from_http_status(500, "internal"))
        })
        .await;

        assert!(matches!(result, Err(FirestoreError::ServerError(500, _))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lost_precondition_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: FirestoreResult<()> = with_retry(&fast(), "write_job", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FirestoreError::from_http_status(412, "stale updateTime"))
        })
        .await;

        assert!(matches!(result, Err(FirestoreError::PreconditionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
