// Telemetry initialisation for the launcher process
//
// Console logging through tracing-subscriber, plus OTLP traces and metrics
// when OTEL_EXPORTER_OTLP_ENDPOINT is set.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_SERVICE_NAME: &str = "workload-launcher";
pub const DEFAULT_LOG_FILTER: &str = "workload_launcher=info,workload_engine=info";

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging and OpenTelemetry export
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Deployment environment (e.g., "production")
    pub environment: Option<String>,
    /// Log filter (e.g., "info", "workload_engine=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "workload-launcher")
    /// - `OTEL_SERVICE_VERSION`: Service version
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint
    /// - `OTEL_ENVIRONMENT`: Deployment environment
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new("service.name", self.service_name.clone())];
        if let Some(version) = &self.service_version {
            attributes.push(KeyValue::new("service.version", version.clone()));
        }
        if let Some(env) = &self.environment {
            attributes.push(KeyValue::new("deployment.environment", env.clone()));
        }
        Resource::builder().with_attributes(attributes).build()
    }

    fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Shuts down the tracer and meter providers when dropped
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown meter provider: {:?}", e);
            }
        }
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {:?}", e);
            }
        }
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP providers
///
/// The meter provider is registered globally so that
/// `OtelMetricClient::new()` records through it. Keep the returned guard
/// alive for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(config.env_filter());

    let (tracer_provider, otel_layer, meter_provider, otel_status) =
        match &config.otlp_endpoint {
            Some(endpoint) => {
                let resource = config.resource();
                match (
                    build_otlp_tracer(endpoint, resource.clone()),
                    build_otlp_meter(endpoint, resource),
                ) {
                    (Ok((tracer_provider, tracer)), Ok(meter_provider)) => {
                        opentelemetry::global::set_meter_provider(meter_provider.clone());
                        let layer = tracing_opentelemetry::layer().with_tracer(tracer);
                        (
                            Some(tracer_provider),
                            Some(layer),
                            Some(meter_provider),
                            Some(Ok(endpoint.clone())),
                        )
                    }
                    (Err(e), _) | (_, Err(e)) => (None, None, None, Some(Err(e.to_string()))),
                }
            }
            None => (None, None, None, None),
        };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(otel_layer)
        .init();

    match otel_status {
        Some(Ok(endpoint)) => {
            tracing::info!(endpoint = %endpoint, "OpenTelemetry export enabled");
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Failed to initialize OTLP export, continuing without it");
        }
        None => {
            tracing::debug!("OpenTelemetry export disabled: OTEL_EXPORTER_OTLP_ENDPOINT not set");
        }
    }

    TelemetryGuard {
        tracer_provider,
        meter_provider,
    }
}

fn build_otlp_tracer(
    endpoint: &str,
    resource: Resource,
) -> anyhow::Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer)> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(DEFAULT_SERVICE_NAME);

    Ok((provider, tracer))
}

fn build_otlp_meter(endpoint: &str, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "workload-launcher");
        assert!(config.otlp_endpoint.is_none());
        assert!(config.log_filter.is_none());
    }
}
