//! Telemetry setup for OpenTelemetry integration

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the OpenTelemetry layer if enabled
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: utagms-worker)
///
/// # Example
///
/// ```text
/// OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
/// OTEL_SERVICE_NAME=utagms-dev \
///     ./utagms-worker
/// ```
pub fn layer() -> Result<Option<BoxedLayer>> {
    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };

    otlp_layer(&endpoint).map(Some)
}

#[cfg(not(feature = "telemetry"))]
fn otlp_layer(endpoint: &str) -> Result<BoxedLayer> {
    anyhow::bail!(
        "OTEL_EXPORTER_OTLP_ENDPOINT={} is set but feature 'telemetry' is not enabled",
        endpoint
    )
}

#[cfg(feature = "telemetry")]
fn otlp_layer(endpoint: &str) -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::{runtime, Resource};

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "utagms-worker".to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
