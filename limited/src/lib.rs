//! # limited
//!
//! `limited` provides the two halves of a small rate limiting contract:
//!
//! * [`TokenBucket`]: a server side admission limiter. A background task refills
//!   a bounded permit counter once per interval and [`TokenBucket::allow`] claims
//!   permits with a lock-free compare-and-swap.
//! * [`Retrier`]: a client side retry orchestrator. Operations return
//!   [`Attempt::Retryable`] to ask for another try; the retrier backs off
//!   exponentially (`2^attempt` units) until the attempt ceiling is reached.
//!
//! A server that rejects work because `allow()` returned `false` signals a
//! retryable condition to its caller, and the caller's `Retrier` backs off.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroU32;
//! use std::time::Duration;
//!
//! use limited::Attempt;
//! use limited::RetryConfig;
//! use limited::Retrier;
//!
//! let retrier = Retrier::new(
//!     RetryConfig::new(NonZeroU32::new(3).unwrap()).with_unit(Duration::from_millis(1)),
//! );
//!
//! let mut calls = 0;
//! let res: Result<u32, &str> = retrier.call(|| {
//!     calls += 1;
//!     if calls < 2 {
//!         Err(Attempt::Retryable("busy"))
//!     } else {
//!         Ok(calls)
//!     }
//! });
//! assert_eq!(res, Ok(2));
//! ```

mod config;
mod error;
mod retry;
mod token_bucket;

pub use config::BucketConfig;
pub use config::OnRetry;
pub use config::RetryConfig;
pub use error::Attempt;
pub use error::BoxError;
pub use error::ConfigError;
pub use error::LifecycleError;
pub use error::Retryable;
pub use error::classify;
pub use retry::Retrier;
pub use retry::next_delay;
pub use token_bucket::BucketState;
pub use token_bucket::TokenBucket;
