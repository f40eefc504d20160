use std::sync::Arc;

use limited::RetryConfig;
use limited::TokenBucket;
use tower::BoxError;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::AdmissionLayer;
use crate::RetryLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Admit requests only while `bucket` has permits.
    fn admission(self, bucket: Arc<TokenBucket>) -> ServiceBuilder<Stack<AdmissionLayer, L>>;

    /// Retry retryable failures with exponential backoff.
    fn retry_with_backoff(
        self,
        config: RetryConfig<BoxError>,
    ) -> ServiceBuilder<Stack<RetryLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn admission(self, bucket: Arc<TokenBucket>) -> ServiceBuilder<Stack<AdmissionLayer, L>> {
        self.layer(AdmissionLayer::new(bucket))
    }

    fn retry_with_backoff(
        self,
        config: RetryConfig<BoxError>,
    ) -> ServiceBuilder<Stack<RetryLayer, L>> {
        self.layer(RetryLayer::new(config))
    }
}
