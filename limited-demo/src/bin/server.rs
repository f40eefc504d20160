//! A toy server that demonstrates server side rate limiting.
//!
//! `GET /bucket` waits a random 50-250ms, then asks a shared token bucket for
//! a permit. An empty bucket answers `429 Too Many Requests`.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use clap::Parser;
use limited::BucketConfig;
use limited::TokenBucket;
use limited_demo::shutdown::shutdown_signal;
use limited_demo::telemetry;
use rand::Rng;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_limited::LimitedError;
use tower_limited::ServiceBuilderExt;
use tracing::info;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(about = "Serve requests behind a token bucket")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Maximum number of tokens in the bucket
    #[arg(long, default_value = "5")]
    capacity: NonZeroUsize,

    /// Tokens added per refill interval
    #[arg(long, default_value_t = 1.0)]
    refill_rate: f64,

    /// Time between refills
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    refill_interval: Duration,

    /// OTLP/gRPC endpoint to export metrics to
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    telemetry::init_tracing();
    let args = Args::parse();

    let meter_provider = telemetry::init_metrics("limited-server", args.otlp_endpoint.as_deref())?;

    let bucket = Arc::new(TokenBucket::new(
        BucketConfig::new(args.capacity, args.refill_rate)
            .with_refill_interval(args.refill_interval),
    )?);
    bucket.start()?;

    let app = Router::new()
        .route("/", get(|| async { StatusCode::OK }))
        .route("/toomany", get(|| async { StatusCode::TOO_MANY_REQUESTS }))
        .route(
            "/bucket",
            get(|| async { "Request allowed - bucket has tokens" }).route_layer(
                ServiceBuilder::new()
                    // 1. Jitter happens before the admission decision.
                    .layer(axum::middleware::from_fn(jitter))
                    // 2. Turn rejections (BoxError) into responses
                    .layer(HandleErrorLayer::new(handle_limited_error))
                    // 3. Claim a token for each request
                    .admission(bucket.clone()),
            ),
        );

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shutdown gracefully");

    bucket.stop().await?;
    if let Some(provider) = meter_provider {
        provider.shutdown()?;
    }
    Ok(())
}

async fn jitter(req: Request, next: Next) -> Response {
    let jitter = Duration::from_millis(rand::rng().random_range(50..250));
    tokio::time::sleep(jitter).await;
    next.run(req).await
}

async fn handle_limited_error(err: BoxError) -> impl IntoResponse {
    let err = LimitedError::from_boxed(err);
    match &err {
        LimitedError::RateLimited { .. } => warn!("Too Many Requests"),
        LimitedError::Inner(msg) => warn!(error = %msg, "request failed"),
    }
    err.into_response()
}
