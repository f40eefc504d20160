use std::time::Duration;

use opentelemetry::global;
use opentelemetry_otlp::MetricExporter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::PeriodicReader;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tower::BoxError;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Export metrics over OTLP/gRPC to `endpoint`, if one is given.
///
/// The returned provider should be shut down before exiting so the last batch
/// is flushed.
pub fn init_metrics(
    service_name: &'static str,
    endpoint: Option<&str>,
) -> Result<Option<SdkMeterProvider>, BoxError> {
    let Some(endpoint) = endpoint else {
        return Ok(None);
    };

    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(EXPORT_INTERVAL)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();

    global::set_meter_provider(provider.clone());
    info!(endpoint, "otel setup successfully");
    Ok(Some(provider))
}
