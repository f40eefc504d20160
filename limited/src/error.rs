use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A type-erased, thread safe error. Identical to `tower::BoxError`.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// The outcome of a single failed attempt, as reported by an operation run
/// under a [`Retrier`](crate::Retrier).
///
/// Both variants own the underlying cause. Only `Retryable` failures are
/// attempted again; the wrapper is stripped before the cause is handed back to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<E> {
    /// A transient failure. The operation may succeed if tried again.
    Retryable(E),
    /// Any other failure. Returned to the caller straight away.
    Fatal(E),
}

impl<E> Attempt<E> {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Attempt::Retryable(_))
    }

    /// Borrow the underlying cause.
    pub fn cause(&self) -> &E {
        match self {
            Attempt::Retryable(err) | Attempt::Fatal(err) => err,
        }
    }

    /// Strip the classification and return the underlying cause.
    pub fn into_inner(self) -> E {
        match self {
            Attempt::Retryable(err) | Attempt::Fatal(err) => err,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Attempt<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cause().fmt(f)
    }
}

impl<E: Error + 'static> Error for Attempt<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause())
    }
}

/// Marks a type-erased error as retryable.
///
/// Use this when the error travels as a [`BoxError`] (for instance through a
/// tower stack) and may pick up further wrapping on the way. [`classify`]
/// finds the marker anywhere in the `source()` chain and recovers its cause.
#[derive(Debug)]
pub struct Retryable(Arc<BoxError>);

impl Retryable {
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self(Arc::new(cause.into()))
    }

    pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
        &**self.0
    }

    pub fn into_inner(self) -> BoxError {
        unshare(self.0)
    }
}

impl fmt::Display for Retryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.cause(), f)
    }
}

impl Error for Retryable {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause())
    }
}

// Only reached if a marker's cause is still shared, which `Retryable` never
// allows since it is not `Clone`.
#[derive(Debug)]
struct SharedCause(Arc<BoxError>);

impl fmt::Display for SharedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self.0, f)
    }
}

impl Error for SharedCause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        (**self.0).source()
    }
}

fn unshare(cause: Arc<BoxError>) -> BoxError {
    Arc::try_unwrap(cause).unwrap_or_else(|shared| Box::new(SharedCause(shared)))
}

/// Sort a type-erased error into [`Attempt::Retryable`] or [`Attempt::Fatal`].
///
/// An error is retryable if a [`Retryable`] marker appears anywhere in its
/// `source()` chain. The retryable variant then holds the marker's cause, and
/// every layer wrapped around the marker is dropped.
pub fn classify(err: BoxError) -> Attempt<BoxError> {
    let cause = find_marker(&*err).map(|marker| Arc::clone(&marker.0));
    let Some(cause) = cause else {
        return Attempt::Fatal(err);
    };
    // Releases the marker's own reference, leaving `cause` as the only one.
    drop(err);
    Attempt::Retryable(unshare(cause))
}

fn find_marker<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a Retryable> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(marker) = err.downcast_ref::<Retryable>() {
            return Some(marker);
        }
        current = err.source();
    }
    None
}

/// Errors raised while starting or stopping a [`TokenBucket`](crate::TokenBucket).
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The refill task needs a tokio runtime and none is running.
    #[error("no tokio runtime available to schedule the refill task")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// `start` was called on a bucket that is running or already stopped.
    #[error("token bucket has already been started")]
    AlreadyStarted,

    /// `stop` was called on a bucket that is not running.
    #[error("token bucket is not running")]
    NotRunning,

    /// The refill task panicked or was aborted before it could be joined.
    #[error("refill task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised when validating limiter configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Refills add whole tokens only, so rates below one are not supported.
    #[error(
        "refill rate must be finite and at least 1 token per interval, got {0} \
         (fractions are truncated, so lower rates would never refill)"
    )]
    InvalidRefillRate(f64),

    #[error("refill interval must be greater than zero")]
    ZeroRefillInterval,
}
