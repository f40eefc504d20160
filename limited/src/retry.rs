use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;
use crate::error::Attempt;

/// Backoff before the attempt following `attempt`: `2^attempt` units.
///
/// There is no cap. The result saturates at [`Duration::MAX`] rather than
/// overflowing.
pub fn next_delay(attempt: u32, unit: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| unit.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Runs operations, retrying [`Attempt::Retryable`] failures with exponential
/// backoff.
///
/// Attempt state lives on the stack of each call, so one `Retrier` can be
/// shared between any number of concurrent callers.
pub struct Retrier<E> {
    config: RetryConfig<E>,
}

impl<E> Retrier<E>
where
    E: fmt::Display,
{
    pub fn new(config: RetryConfig<E>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig<E> {
        &self.config
    }

    /// Run `operation`, blocking the calling thread between attempts.
    ///
    /// Returns the first success, the cause of the first fatal failure, or the
    /// cause of the last retryable failure once `max_attempts` is reached.
    pub fn call<T, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, Attempt<E>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation() {
                Ok(res) => return Ok(res),
                Err(err) => err,
            };
            let delay = self.schedule_retry(attempt, err)?;
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// As [`call`](Self::call), but sleeps on the tokio timer between attempts.
    pub async fn call_async<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(res) => return Ok(res),
                Err(err) => err,
            };
            let delay = self.schedule_retry(attempt, err)?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Decide what follows a failed attempt: either the delay before the next
    /// one, or the error to hand back to the caller.
    fn schedule_retry(&self, attempt: u32, err: Attempt<E>) -> Result<Duration, E> {
        match err {
            Attempt::Fatal(err) => {
                debug!(attempt, error = %err, "attempt failed, not retryable");
                Err(err)
            }
            Attempt::Retryable(err) if attempt >= self.config.max_attempts.get() => {
                debug!(attempt, error = %err, "retries exhausted");
                Err(err)
            }
            Attempt::Retryable(err) => {
                let delay = next_delay(attempt, self.config.unit);
                if let Some(on_retry) = &self.config.on_retry {
                    on_retry(attempt, &err, delay);
                }
                debug!(attempt, ?delay, error = %err, "attempt failed, retrying");
                Ok(delay)
            }
        }
    }
}

impl<E> Clone for Retrier<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl<E> fmt::Debug for Retrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("config", &self.config)
            .finish()
    }
}
