use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::errors::{AppError, ErrorKind};
use crate::observability::TrackerMetrics;

/// Exponential backoff for cache reads. Mutations never go through this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Waits between attempts: base, 2x base, 4x base ... capped at `max_delay`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        // Base 2 with a factor of half the base delay yields base * 2^n
        let factor = (self.base_delay.as_millis() as u64).div_ceil(2);
        let jittered = self.jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.max_retries as usize)
            .map(move |delay| if jittered { jitter(delay) } else { delay })
    }

    pub fn should_retry(&self, err: &AppError, retries_so_far: u32) -> bool {
        // Offline reads fail fast; the reconnect listener refetches instead
        retries_so_far < self.max_retries
            && err.is_retryable()
            && err.kind() != ErrorKind::NetworkOffline
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        metrics: &TrackerMetrics,
        mut attempt: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let attempts = AtomicU32::new(0);

        let action = || {
            let previous = attempts.fetch_add(1, Ordering::SeqCst);
            if previous > 0 {
                metrics.record_retry();
                debug!(operation, attempt = previous + 1, "Retrying read");
            }
            attempt()
        };

        let condition = |err: &AppError| {
            let made = attempts.load(Ordering::SeqCst);
            let retry = self.should_retry(err, made.saturating_sub(1));
            if retry {
                warn!(
                    operation,
                    attempt = made,
                    max_retries = self.max_retries,
                    error = %err,
                    "Read failed, retrying"
                );
            } else if err.is_retryable() {
                warn!(operation, attempt = made, error = %err, "Read failed, giving up");
            } else {
                error!(operation, error = %err, "Read failed with non-retryable error");
            }
            retry
        };

        let result = RetryIf::spawn(self.delays(), action, condition).await;
        let made = attempts.load(Ordering::SeqCst);
        if result.is_ok() && made > 1 {
            info!(operation, attempt = made, "Read succeeded after retry");
        }
        result
    }
}
