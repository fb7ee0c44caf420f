//! Retry with exponential backoff and jitter for model calls.

use std::future::Future;
use std::time::Duration;

use crate::error::SqlTalkError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
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
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Execute an async operation, retrying errors that
    /// [`SqlTalkError::is_retryable`] accepts.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, SqlTalkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SqlTalkError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "retrying model call"
            );

            // Jitter: 75%-125% of backoff, never below a server-provided hint.
            let jitter_factor = 0.75 + (rand_factor() * 0.5);
            let mut sleep_duration =
                Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
            if let SqlTalkError::RateLimited {
                retry_after_ms: Some(ms),
            } = err
            {
                sleep_duration = sleep_duration.max(Duration::from_millis(ms));
            }
            tokio::time::sleep(sleep_duration.min(self.max_backoff)).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Pseudo-random factor in [0, 1) from the clock and thread id.
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

    (hasher.finish() % 10_000) as f64 / 10_000.0
}
