//! Telemetry setup for apps-dns.
//!
//! Logs always go to stdout through the fmt layer. With the `prometheus`
//! feature, metrics are served from `prometheus_addr`; with the `otel`
//! feature, spans are exported over OTLP.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
#[cfg(any(feature = "prometheus", feature = "otel"))]
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

#[cfg(feature = "otel")]
use std::sync::OnceLock;
#[cfg(feature = "otel")]
static TRACER_PROVIDER: OnceLock<opentelemetry_sdk::trace::SdkTracerProvider> = OnceLock::new();

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initialize tracing, and the metrics and span exporters that are compiled in.
pub fn init(config: &TelemetryConfig) -> Result<(), BoxError> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    if let Some(ref otel_config) = config.opentelemetry {
        let tracer = otel_tracer(otel_config)?;
        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
        info!(endpoint = %otel_config.endpoint, "OpenTelemetry tracing enabled");
        return finish(config);
    }

    registry.init();
    finish(config)
}

/// `RUST_LOG` when set and valid; otherwise the configured level.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

#[allow(unused_variables)]
fn finish(config: &TelemetryConfig) -> Result<(), BoxError> {
    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        start_prometheus_exporter(addr)?;
    }
    Ok(())
}

#[cfg(feature = "otel")]
fn otel_tracer(
    otel_config: &crate::config::OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracer, BoxError> {
    use opentelemetry::trace::TracerProvider;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel_config.endpoint)
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, otel_config.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer("apps-dns");
    let _ = TRACER_PROVIDER.set(provider);
    Ok(tracer)
}

#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(addr: SocketAddr) -> Result<(), BoxError> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Flush buffered spans. A no-op without the `otel` feature.
pub fn shutdown() {
    #[cfg(feature = "otel")]
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!("Error shutting down tracer provider: {}", e);
        }
    }
}
