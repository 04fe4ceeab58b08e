use crate::Environment;
use crate::logging::{env_filter, fmt_layer};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// What a run benchmarks. Attached to every exported span and metric so runs
/// against different backends or datasets can be told apart in the collector.
#[derive(Debug, Clone, Default)]
pub struct RunAttributes {
    pub backend: String,
    pub dataset: String,
    pub scenario: String,
    pub mode: String,
}

impl RunAttributes {
    fn resource(&self, service_name: &str) -> Resource {
        Resource::builder()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, service_name.to_string()),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new("benchmark.backend", self.backend.clone()),
                KeyValue::new("benchmark.dataset", self.dataset.clone()),
                KeyValue::new("benchmark.scenario", self.scenario.clone()),
                KeyValue::new("benchmark.mode", self.mode.clone()),
            ])
            .build()
    }
}

/// OTLP export of the run's spans and driver metrics, plus the log subscriber.
///
/// The tonic exporters need a Tokio runtime that outlives the guard. Dropping the
/// guard flushes whatever is still buffered.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
        run: &RunAttributes,
    ) -> anyhow::Result<Self> {
        let resource = run.resource(service_name);

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_batch_exporter(span_exporter)
            .build();

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(
                PeriodicReader::builder(metric_exporter)
                    .with_interval(METRIC_EXPORT_INTERVAL)
                    .build(),
            )
            .build();
        // The driver creates its instruments from the global meter provider.
        global::set_meter_provider(meter_provider.clone());

        let tracer = tracer_provider.tracer(service_name.to_string());
        tracing_subscriber::registry()
            .with(fmt_layer(environment))
            .with(env_filter())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;

        tracing::info!(
            endpoint,
            backend = %run.backend,
            dataset = %run.dataset,
            "Exporting telemetry"
        );
        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!(error = %e, "Failed to flush metrics");
        }
        if let Err(e) = self.tracer_provider.shutdown() {
            tracing::warn!(error = %e, "Failed to flush spans");
        }
    }
}
