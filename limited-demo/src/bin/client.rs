//! A toy client that demonstrates client side retries.
//!
//! On every tick the client requests `/bucket` through a [`Retrier`]. Status
//! codes that signal overload are retried with exponential backoff; the client
//! exits with the underlying error once it runs out of attempts.

use std::num::NonZeroU32;
use std::time::Duration;

use clap::Parser;
use limited::Attempt;
use limited::RetryConfig;
use limited::Retrier;
use limited_demo::shutdown::shutdown_signal;
use limited_demo::telemetry;
use reqwest::StatusCode;
use tower::BoxError;
use tracing::error;
use tracing::info;
use tracing::warn;

const RETRYABLE_STATUS_CODES: [StatusCode; 3] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Parser)]
#[command(about = "Call a rate limited server, backing off when told to")]
struct Args {
    /// URL to request on every tick
    #[arg(long, default_value = "http://localhost:8080/bucket")]
    url: String,

    /// Time between requests
    #[arg(long, default_value = "300ms", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Attempts per request, including the first one
    #[arg(long, default_value = "5")]
    max_attempts: NonZeroU32,

    /// Backoff unit; the delay after attempt n is 2^n units
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    backoff_unit: Duration,

    /// OTLP/gRPC endpoint to export metrics to
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("received retryable status code: {0}")]
    RetryableStatus(StatusCode),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    telemetry::init_tracing();
    let args = Args::parse();

    let meter_provider = telemetry::init_metrics("limited-client", args.otlp_endpoint.as_deref())?;

    let retrier = Retrier::new(
        RetryConfig::new(args.max_attempts)
            .with_unit(args.backoff_unit)
            .with_on_retry(|attempt, err: &FetchError, next_delay| {
                warn!(attempt, error = %err, ?next_delay, "request failed, retrying");
            }),
    );
    let client = reqwest::Client::new();

    let mut ticker = tokio::time::interval(args.interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = ticker.tick() => {}
        }

        info!(url = %args.url, "tick... making request to server");
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            res = retrier.call_async(|| fetch(&client, &args.url)) => {
                if let Err(err) = res {
                    error!(error = %err, "giving up on request");
                    break Err(err);
                }
            }
        }
    };

    if let Some(provider) = meter_provider {
        provider.shutdown()?;
    }
    outcome.map_err(Into::into)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<(), Attempt<FetchError>> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Attempt::Fatal(e.into()))?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| Attempt::Fatal(e.into()))?;
    info!(%status, body, "got response");

    if RETRYABLE_STATUS_CODES.contains(&status) {
        return Err(Attempt::Retryable(FetchError::RetryableStatus(status)));
    }
    Ok(())
}
