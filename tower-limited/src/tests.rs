use std::error::Error;
use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::Ready;
use futures::future::ready;
use limited::BucketConfig;
use limited::RetryConfig;
use limited::Retryable;
use limited::TokenBucket;
use more_asserts::assert_ge;
use tokio::time::Instant;
use tokio::time::pause;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;

use super::*;

#[derive(Clone, Debug)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("upstream refused")]
struct UpstreamRefused;

fn started_bucket(capacity: usize) -> Arc<TokenBucket> {
    let bucket = TokenBucket::new(BucketConfig::new(
        NonZeroUsize::new(capacity).unwrap(),
        1.0,
    ))
    .unwrap();
    bucket.start().unwrap();
    Arc::new(bucket)
}

fn retry_config(max_attempts: u32) -> RetryConfig<BoxError> {
    RetryConfig::new(NonZeroU32::new(max_attempts).unwrap())
}

fn expect_rate_limited(err: BoxError) -> Duration {
    match err.downcast_ref::<LimitedError>() {
        Some(LimitedError::RateLimited { retry_after }) => *retry_after,
        _ => panic!("expected RateLimited, got {err}"),
    }
}

#[tokio::test]
async fn test_admission_fails_fast_when_empty() {
    pause();
    let bucket = started_bucket(2);
    let count = Arc::new(AtomicUsize::new(0));
    let mut service = AdmissionService::new(
        MockService {
            count: count.clone(),
        },
        bucket.clone(),
    );

    service.ready().await.unwrap().call(()).await.unwrap();
    service.ready().await.unwrap().call(()).await.unwrap();

    let err = ServiceExt::<()>::ready(&mut service).await.unwrap_err();
    assert_eq!(expect_rate_limited(err), Duration::from_secs(1));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    // One refill interval later a permit is back.
    sleep(Duration::from_millis(1_010)).await;
    service.ready().await.unwrap().call(()).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_repeated_readiness_claims_one_permit() {
    pause();
    let bucket = started_bucket(3);
    let mut service = AdmissionService::new(
        MockService {
            count: Arc::new(AtomicUsize::new(0)),
        },
        bucket.clone(),
    );

    ServiceExt::<()>::ready(&mut service).await.unwrap();
    ServiceExt::<()>::ready(&mut service).await.unwrap();
    assert_eq!(bucket.available(), 2);

    service.call(()).await.unwrap();
    assert_eq!(bucket.available(), 2);

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_shared_bucket_across_clones() {
    pause();
    let bucket = started_bucket(1);
    let layer = AdmissionLayer::new(bucket.clone());

    let mut svc1 = layer.layer(MockService {
        count: Arc::new(AtomicUsize::new(0)),
    });
    let mut svc2 = layer.layer(MockService {
        count: Arc::new(AtomicUsize::new(0)),
    });

    svc1.ready().await.unwrap().call(()).await.unwrap();

    // svc2 should now be rejected because svc1 used the token
    assert!(ServiceExt::<()>::ready(&mut svc2).await.is_err());

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_pending_inner_does_not_consume_tokens() {
    pause();
    let bucket = started_bucket(2);
    let (mock, mut handle) = tower_test::mock::pair::<(), &'static str>();
    let mut service = AdmissionService::new(mock, bucket.clone());

    handle.allow(0);
    assert!(futures::poll!(ServiceExt::<()>::ready(&mut service)).is_pending());
    assert_eq!(bucket.available(), 2);

    handle.allow(1);
    ServiceExt::<()>::ready(&mut service).await.unwrap();
    assert_eq!(bucket.available(), 1);

    let response = service.call(());
    let (_req, send) = handle.next_request().await.unwrap();
    send.send_response("done");
    assert_eq!(response.await.unwrap(), "done");

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_inner_errors_pass_through() {
    pause();
    let bucket = started_bucket(1);
    let mut service = AdmissionLayer::new(bucket.clone()).layer(service_fn(|_req: ()| async {
        Err::<(), UpstreamRefused>(UpstreamRefused)
    }));

    let err = service.ready().await.unwrap().call(()).await.unwrap_err();
    assert!(err.is::<UpstreamRefused>());

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_retry_waits_for_a_refill() {
    pause();
    let bucket = started_bucket(1);
    let count = Arc::new(AtomicUsize::new(0));

    let mut service = ServiceBuilder::new()
        .retry_with_backoff(retry_config(3))
        .admission(bucket.clone())
        .service(MockService {
            count: count.clone(),
        });

    service.ready().await.unwrap().call(()).await.unwrap();

    // The bucket is empty now; the first retry comes after 2s, by which time
    // the refill task has put a token back.
    let start = Instant::now();
    service.ready().await.unwrap().call(()).await.unwrap();
    assert_ge!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    bucket.stop().await.unwrap();
}

#[tokio::test]
async fn test_retry_gives_up_with_the_cause() {
    pause();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let inner = service_fn(move |_req: ()| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), BoxError>(Retryable::new("status 503").into())
        }
    });

    let mut service = RetryLayer::new(retry_config(3)).layer(inner);
    let err = service.ready().await.unwrap().call(()).await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!err.is::<Retryable>());
    assert_eq!(err.to_string(), "status 503");
}

#[derive(Debug, thiserror::Error)]
#[error("upstream call failed")]
struct UpstreamFailed(#[source] BoxError);

#[tokio::test]
async fn test_retry_unwraps_a_nested_marker() {
    pause();
    let inner = service_fn(|_req: ()| async {
        Err::<(), UpstreamFailed>(UpstreamFailed(Retryable::new("status 429").into()))
    });

    let mut service = RetryLayer::new(retry_config(2)).layer(inner);
    let err = service.ready().await.unwrap().call(()).await.unwrap_err();

    assert!(!err.is::<UpstreamFailed>());
    assert!(!err.is::<Retryable>());
    assert!(err.source().is_none());
    assert_eq!(err.to_string(), "status 429");
}

#[tokio::test]
async fn test_retry_returns_fatal_errors_immediately() {
    pause();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let inner = service_fn(move |_req: ()| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), UpstreamRefused>(UpstreamRefused)
        }
    });

    let mut service = RetryLayer::new(retry_config(5)).layer(inner);
    let err = service.ready().await.unwrap().call(()).await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(err.is::<UpstreamRefused>());
}

#[tokio::test]
async fn test_exhausted_admission_surfaces_rate_limited() {
    pause();
    let bucket = started_bucket(1);
    bucket.stop().await.unwrap();
    assert!(bucket.allow());

    // Stopped and empty: every attempt is rejected.
    let mut service = ServiceBuilder::new()
        .retry_with_backoff(retry_config(2))
        .admission(bucket)
        .service(MockService {
            count: Arc::new(AtomicUsize::new(0)),
        });

    let err = service.ready().await.unwrap().call(()).await.unwrap_err();
    assert_eq!(expect_rate_limited(err), Duration::from_secs(1));
}

#[test]
fn rate_limited_is_retryable() {
    let err: BoxError = Box::new(LimitedError::RateLimited {
        retry_after: Duration::from_secs(1),
    });
    assert!(classify_error(err).is_retryable());
    assert!(!classify_error(Box::new(UpstreamRefused)).is_retryable());
}

#[test]
fn from_boxed_recovers_limited_errors() {
    let err: BoxError = Box::new(LimitedError::RateLimited {
        retry_after: Duration::from_secs(2),
    });
    assert!(matches!(
        LimitedError::from_boxed(err),
        LimitedError::RateLimited { retry_after } if retry_after == Duration::from_secs(2)
    ));

    let err: BoxError = Box::new(UpstreamRefused);
    assert!(matches!(
        LimitedError::from_boxed(err),
        LimitedError::Inner(msg) if msg == "upstream refused"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_hammer() {
    let capacity = 50;
    let bucket = Arc::new(
        TokenBucket::new(
            BucketConfig::new(NonZeroUsize::new(capacity).unwrap(), 1.0)
                .with_refill_interval(Duration::from_secs(3_600)),
        )
        .unwrap(),
    );
    bucket.start().unwrap();

    let mock_count = Arc::new(AtomicUsize::new(0));
    let service = AdmissionLayer::new(bucket.clone()).layer(MockService {
        count: mock_count.clone(),
    });

    let mut handles = vec![];
    for _ in 0..100 {
        let svc = service.clone();
        handles.push(tokio::spawn(async move { svc.oneshot(()).await }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.expect("Task panicked") {
            Ok(()) => admitted += 1,
            Err(err) => {
                expect_rate_limited(err);
                rejected += 1;
            }
        }
    }

    assert_eq!(admitted, capacity);
    assert_eq!(rejected, 50);
    assert_eq!(
        mock_count.load(Ordering::SeqCst),
        capacity,
        "Inner service should only see admitted requests"
    );

    bucket.stop().await.unwrap();
}
