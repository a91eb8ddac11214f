use std::{future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

use crate::error::{ErrorKind, GatewayError};

pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bounded exponential backoff for transient cluster errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn no_retries() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempts_used` failed ones.
    pub fn backoff_delay(&self, attempts_used: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempts_used.saturating_sub(1));
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

#[derive(Debug, Error)]
#[error("{operation}: {source} (retry_attempts_used={attempts_used} max_attempts={max_attempts})")]
pub struct RetryFailure {
    pub operation: String,
    pub attempts_used: u32,
    pub max_attempts: u32,
    #[source]
    pub source: GatewayError,
}

impl RetryFailure {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Transient errors that ran out of attempts are still worth a later,
    /// operator-driven resume.
    pub fn exhausted_transient(&self) -> bool {
        self.kind().retryable()
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up. Returns the value and the attempts used.
pub async fn retry_async<T, O, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: O,
) -> Result<(T, u32), RetryFailure>
where
    O: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(error) => {
                if !error.is_retryable() || attempts >= max_attempts {
                    return Err(RetryFailure {
                        operation: operation_name.to_owned(),
                        attempts_used: attempts,
                        max_attempts,
                        source: error,
                    });
                }

                let delay = policy.backoff_delay(attempts);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient cluster error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
