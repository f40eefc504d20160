use std::sync::Arc;

use limited::TokenBucket;
use tower::Layer;

use crate::service::AdmissionService;

/// Applies token bucket admission to requests.
///
/// The bucket is shared by every service this layer produces. Starting and
/// stopping it remains the caller's job.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    bucket: Arc<TokenBucket>,
}

impl AdmissionLayer {
    /// Create an AdmissionLayer
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        AdmissionLayer { bucket }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, self.bucket.clone())
    }
}
