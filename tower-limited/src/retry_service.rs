use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use limited::Attempt;
use limited::Retrier;
use limited::classify;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::LimitedError;

/// Sort a middleware error into retryable or fatal.
///
/// [`LimitedError::RateLimited`] is always retryable. Other errors are
/// retryable only if they carry the [`limited::Retryable`] marker.
pub fn classify_error(err: BoxError) -> Attempt<BoxError> {
    if let Some(LimitedError::RateLimited { .. }) = err.downcast_ref::<LimitedError>() {
        return Attempt::Retryable(err);
    }
    classify(err)
}

/// Drives every request through a [`Retrier`].
///
/// Each attempt runs on a fresh clone of the inner service, which is polled
/// for readiness as part of the attempt. A rejection while becoming ready
/// (for instance from an [`AdmissionService`](crate::AdmissionService)) is
/// therefore retried like any other retryable error.
#[derive(Debug)]
pub struct RetryService<S> {
    inner: S,
    retrier: Arc<Retrier<BoxError>>,
    retries: Counter<u64>,
}

impl<S: Clone> Clone for RetryService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            retrier: Arc::clone(&self.retrier),
            retries: self.retries.clone(),
        }
    }
}

impl<S> RetryService<S> {
    pub fn new(inner: S, retrier: Arc<Retrier<BoxError>>) -> Self {
        let meter = global::meter("limited.retry");
        Self {
            inner,
            retrier,
            retries: meter.u64_counter("retries").build(),
        }
    }
}

impl<S, Req> Service<Req> for RetryService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    // We return a BoxFuture because we are creating an async block
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked per attempt, inside call().
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        let retrier = Arc::clone(&self.retrier);
        let retries = self.retries.clone();

        Box::pin(async move {
            let mut attempt = 0u32;
            retrier
                .call_async(move || {
                    attempt += 1;
                    if attempt > 1 {
                        retries.add(1, &[]);
                    }
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { svc.oneshot(req).await.map_err(|e| classify_error(e.into())) }
                })
                .await
        })
    }
}
