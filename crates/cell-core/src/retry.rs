//! Bounded retry loop driven by a [`RetryStrategy`].
use std::{fmt, future::Future, time::Duration};

use cell_model::RetryStrategy;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display + fmt::Debug> {
    #[error("canceled")]
    Canceled,

    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Convert the strategy's n-th delay into a [`Duration`].
pub fn to_delay(s: &RetryStrategy, attempt: u32) -> Duration {
    Duration::from_millis(s.delay_ms(attempt))
}

/// Run `op` until it succeeds, the attempts are exhausted or `cancel` fires.
///
/// At least one attempt is made even if `attempts` is zero. Cancellation is
/// observed both during an attempt and during the backoff sleep.
pub async fn retry<T, E, F, Fut>(
    strategy: &RetryStrategy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = strategy.attempts.max(1);
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            res = op() => res,
            _ = cancel.cancelled() => return Err(RetryError::Canceled),
        };
        let err = match outcome {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= attempts {
            return Err(RetryError::Exhausted { attempts, last: err });
        }
        let delay = to_delay(strategy, attempt - 1);
        trace!(attempt, ?delay, error = %err, "attempt failed, retrying");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(RetryError::Canceled),
        }
    }
}
