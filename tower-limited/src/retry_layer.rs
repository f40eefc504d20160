use std::sync::Arc;

use limited::Retrier;
use limited::RetryConfig;
use tower::BoxError;
use tower::Layer;

use crate::retry_service::RetryService;

/// Retries requests with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    retrier: Arc<Retrier<BoxError>>,
}

impl RetryLayer {
    pub fn new(config: RetryConfig<BoxError>) -> Self {
        Self {
            retrier: Arc::new(Retrier::new(config)),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService::new(inner, self.retrier.clone())
    }
}
