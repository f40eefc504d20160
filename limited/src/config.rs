use std::fmt;
use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

/// Observer invoked before each retry sleep with the attempt that just failed,
/// the error it failed with and the delay before the next attempt.
pub type OnRetry<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// Configuration for a [`TokenBucket`](crate::TokenBucket).
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    /// Maximum number of tokens the bucket holds.
    pub capacity: NonZeroUsize,
    /// Tokens added per refill interval. Fractions are truncated on every tick.
    pub refill_rate: f64,
    /// Time between refills. Defaults to one second.
    pub refill_interval: Duration,
}

impl BucketConfig {
    pub fn new(capacity: NonZeroUsize, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            refill_interval: Duration::from_secs(1),
        }
    }

    pub fn with_refill_interval(mut self, refill_interval: Duration) -> Self {
        self.refill_interval = refill_interval;
        self
    }

    /// Check that the bucket this describes would ever refill.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.refill_rate.is_finite() || self.refill_rate < 1.0 {
            return Err(ConfigError::InvalidRefillRate(self.refill_rate));
        }
        if self.refill_interval.is_zero() {
            return Err(ConfigError::ZeroRefillInterval);
        }
        Ok(())
    }

    /// Whole tokens added on each tick.
    pub(crate) fn refill_amount(&self) -> usize {
        self.refill_rate.trunc() as usize
    }
}

/// Configuration for a [`Retrier`](crate::Retrier) whose operations fail with `E`.
pub struct RetryConfig<E> {
    /// Attempts made before giving up, including the first one.
    pub max_attempts: NonZeroU32,
    /// Backoff unit. The delay after attempt `n` is `2^n` units.
    pub unit: Duration,
    pub on_retry: Option<OnRetry<E>>,
}

impl<E> RetryConfig<E> {
    pub fn new(max_attempts: NonZeroU32) -> Self {
        Self {
            max_attempts,
            unit: Duration::from_secs(1),
            on_retry: None,
        }
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_on_retry<F>(mut self, on_retry: F) -> Self
    where
        F: Fn(u32, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }
}

// Manual impls so that `E` needs neither `Clone` nor `Debug`.
impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            unit: self.unit,
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("unit", &self.unit)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}
