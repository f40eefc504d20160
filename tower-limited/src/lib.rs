//! # Tower Limited
//!
//! `tower-limited` plugs the [`limited`] primitives into the
//! [Tower](https://github.com/tower-rs/tower) ecosystem.
//!
//! ## Server side
//! [`AdmissionLayer`] asks a shared [`TokenBucket`] for a permit in `poll_ready`.
//! An empty bucket fails fast with [`LimitedError::RateLimited`] instead of
//! queueing, so the caller can back off and try again.
//!
//! ## Client side
//! [`RetryLayer`] drives each request through a [`limited::Retrier`]. Inner
//! errors carrying the [`limited::Retryable`] marker (anywhere in their
//! `source()` chain), as well as [`LimitedError::RateLimited`], are retried
//! with exponential backoff. Anything else is returned straight away.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LimitedError`], mapping rate limiting
//!   to `429 Too Many Requests` with a `Retry-After` header.

mod builder;
mod error;
mod layer;
mod retry_layer;
mod retry_service;
mod service;

#[cfg(test)]
mod tests;

#[cfg(doc)]
use limited::TokenBucket;

pub use builder::ServiceBuilderExt;
pub use error::LimitedError;
pub use layer::AdmissionLayer;
pub use retry_layer::RetryLayer;
pub use retry_service::RetryService;
pub use retry_service::classify_error;
pub use service::AdmissionService;
pub use service::ResponseFuture;
