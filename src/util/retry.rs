//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::DelveError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn single_attempt() -> Self {
        Self::with_max_attempts(1)
    }

    /// Default backoff with the given attempt budget (at least one).
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    ///
    /// Only errors for which [`DelveError::is_retryable`] holds are retried. A
    /// rate-limit hint from the server overrides the computed backoff.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, DelveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DelveError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "Retrying after error"
            );

            let sleep_duration = match err {
                DelveError::RateLimited {
                    retry_after_ms: Some(ms),
                } => Duration::from_millis(ms).min(self.max_backoff),
                _ => {
                    // Jitter: 75%–125% of backoff
                    let jitter_factor = 0.75 + (rand_factor() * 0.5);
                    Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
                }
            };
            tokio::time::sleep(sleep_duration).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Pseudo-random factor in [0, 1).
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
