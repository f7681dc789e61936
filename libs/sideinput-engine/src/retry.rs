use std::time::Duration;

use sideinput_api::SideInputError;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

/// Exponential backoff for transient store errors.
///
/// Only errors whose kind is transient (`StorageWrite`, `StorageRead`) are
/// retried; everything else is returned after the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial,
            max,
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
        )
    }

    /// One attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let nanos = self.initial.as_nanos() as f64 * self.multiplier.powi(exp);
        Duration::from_nanos(nanos.min(self.max.as_nanos() as f64) as u64)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// Backoff sleeps end early when `token` is cancelled; the last error is
    /// returned in that case.
    pub async fn run<T>(
        &self,
        token: &CancellationToken,
        what: &str,
        mut op: impl FnMut() -> Result<T, SideInputError>,
    ) -> Result<T, SideInputError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op() {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.kind().is_transient() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(err.with_context(format!("{what}: gave up after {attempt} attempts")));
            }

            let delay = self.backoff(attempt);
            tracing::warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient error, retrying");
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(err.with_context(format!("{what}: cancelled during backoff")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
