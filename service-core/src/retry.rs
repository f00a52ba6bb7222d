//! Exponential-backoff retries for read calls across the service boundary.
//!
//! Only errors for which [`AppError::is_transient`] holds are retried; any
//! other error is returned on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::AppError;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Adds up to a quarter of the delay on top.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short, deterministic delays for tests and interactive callers.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::try_from_secs_f64(secs)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff));

        if self.add_jitter {
            delay + delay.mul_f64(0.25 * jitter_fraction())
        } else {
            delay
        }
    }
}

/// In [0, 1), taken from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Run `f` until it succeeds, fails permanently, or runs out of retries.
///
/// ```ignore
/// let split = retry_call(&config.store_retry, "get_unreconciled_transactions", || {
///     store.get_unreconciled_transactions(bank_account_id, statement_date)
/// })
/// .await?;
/// ```
pub async fn retry_call<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        let err = match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Service call recovered"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            warn!(operation = operation_name, error = %err, "Service call failed");
            return Err(err);
        }
        if attempt >= config.max_retries {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                error = %err,
                "Service call still failing, giving up"
            );
            return Err(err);
        }

        let delay = config.delay_for(attempt);
        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
