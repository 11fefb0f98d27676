//! Retry policy for transient model failures.
//!
//! Retries belong to the token-generation collaborator: the orchestrator
//! surfaces whatever error remains once the policy gives up.

use std::future::Future;
use std::time::Duration;

use compass_abstraction::ModelError;
use tracing::warn;

/// Exponential backoff with a fixed attempt count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the first backoff delay.
    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Delay that follows `current`, capped at `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Only transient errors (see [`ModelError::is_transient`]) are retried.
    ///
    /// # Errors
    /// Returns the last error, annotated with the attempt count when retries
    /// were exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient model failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.next_backoff(backoff);
                    attempt += 1;
                }
                Err(err) if err.is_transient() && attempt > 1 => {
                    return Err(exhausted(label, attempt, err));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn exhausted(label: &str, attempts: u32, err: ModelError) -> ModelError {
    match err {
        ModelError::RequestError(msg) => {
            ModelError::RequestError(format!("{label} failed after {attempts} attempts: {msg}"))
        }
        ModelError::Timeout(msg) => {
            ModelError::Timeout(format!("{label} failed after {attempts} attempts: {msg}"))
        }
        other => other,
    }
}
