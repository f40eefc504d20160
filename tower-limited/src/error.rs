use std::time::Duration;

use tower::BoxError;

/// Errors produced by the Tower Limited middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitedError {
    /// The token bucket had no permit left for this request.
    ///
    /// `retry_after` is the bucket's refill interval, the earliest time a
    /// permit can reappear. When the `axum` feature is enabled, this converts
    /// to `429 Too Many Requests` with a `Retry-After` header.
    #[error("Too many requests - bucket is empty")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl LimitedError {
    /// Recover a `LimitedError` from a boxed middleware error, wrapping any
    /// other error as [`LimitedError::Inner`].
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<LimitedError>() {
            Ok(err) => *err,
            Err(err) => LimitedError::Inner(err.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LimitedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
