use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use limited::TokenBucket;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use crate::error::LimitedError;

#[derive(Clone, Debug)]
struct AdmissionMetrics {
    decisions: Counter<u64>,
}

/// Admits requests while the shared [`TokenBucket`] has permits.
///
/// A permit is claimed in `poll_ready`, once the inner service is ready, and
/// spent by the following `call`. Polling readiness again before calling does
/// not claim a second permit.
#[derive(Debug)]
pub struct AdmissionService<S> {
    inner: S,
    bucket: Arc<TokenBucket>,
    permit_acquired: bool,
    instruments: AdmissionMetrics,
}

pin_project! {
    /// A future that converts the inner service error into a [`BoxError`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx).map_err(Into::into)
    }
}

// A permit belongs to the service that claimed it, so clones start without one.
impl<S> Clone for AdmissionService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            bucket: Arc::clone(&self.bucket),
            permit_acquired: false,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req>,
    S::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Check inner service readiness FIRST to avoid over-consuming tokens
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
            Poll::Ready(Ok(())) => {}
        }

        if !self.permit_acquired {
            if self.bucket.allow() {
                self.permit_acquired = true;
                self.instruments
                    .decisions
                    .add(1, &[KeyValue::new("outcome", "admitted")]);
            } else {
                self.instruments
                    .decisions
                    .add(1, &[KeyValue::new("outcome", "rejected")]);
                debug!("request rejected, token bucket is empty");
                return Poll::Ready(Err(Box::new(LimitedError::RateLimited {
                    retry_after: self.bucket.refill_interval(),
                })));
            }
        }

        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit_acquired = false;
        ResponseFuture {
            inner: self.inner.call(req),
        }
    }
}

impl<S> AdmissionService<S> {
    pub fn new(inner: S, bucket: Arc<TokenBucket>) -> Self {
        let meter = global::meter("limited.admission");
        let instruments = AdmissionMetrics {
            decisions: meter.u64_counter("admission_decisions").build(),
        };

        Self {
            inner,
            bucket,
            permit_acquired: false,
            instruments,
        }
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}
