//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber::fmt` is always on. On top of
//! it the server can export OpenTelemetry traces and metrics, either to an
//! OTLP collector or to stdout.
//!
//! ## Feature matrix
//!
//! - `otel`: Exports `tracing` spans as OpenTelemetry traces.
//! - `metrics`: Records call counts, errors, in-flight calls and durations.
//! - `otlp`: Enables the OTLP exporter (gRPC, endpoint from `OTLP_ENDPOINT`).
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require at least one of: `otel` or `metrics`.
//! - `otlp` and `stdout` can be enabled at the same time.
//!
//! ## Span behavior
//!
//! Every dispatched call runs inside a `call` span carrying the operation path
//! and call shape, so handler events (`tracing::info!`, etc.) become span
//! events in the telemetry backend. Events outside of a span are only shown in
//! log output.
//!
//! ## Example usage
//!
//! ```bash
//! OTLP_ENDPOINT=http://localhost:4317 cargo run --features otel,metrics,otlp
//! cargo run --features otel,stdout
//! ```

#[cfg(all(feature = "otlp", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'otel' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use core::time::Duration;
use tandem::{CallObserver, Shape};
use tonic::Code;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "otel")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "metrics", feature = "otel"))]
const SERVICE_NAME: &str = "tandem";

pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every exporter, reporting failures on stderr.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

/// Collector endpoint and payload compression of the OTLP exporter.
///
/// `OTLP_ENDPOINT` is required; `OTLP_COMPRESSION` defaults to `gzip`.
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "otel")))]
fn otlp_settings() -> anyhow::Result<(String, Compression)> {
    use anyhow::Context;
    use core::str::FromStr;

    let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;
    let compression = std::env::var("OTLP_COMPRESSION")
        .unwrap_or_else(|_| "gzip".to_owned())
        .to_ascii_lowercase();
    let compression = Compression::from_str(&compression)
        .with_context(|| format!("invalid `OTLP_COMPRESSION`: {compression}"))?;
    Ok((endpoint, compression))
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let reader =
            sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(Duration::from_secs(5))
                .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = otlp_settings()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let (endpoint, compression) = otlp_settings()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(Duration::from_secs(10))
            .with_compression(compression)
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "otel", any(feature = "stdout", feature = "otlp")))]
fn batch<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "metrics")]
struct Instruments {
    calls: Counter<u64>,
    errors: Counter<u64>,
    inflight: UpDownCounter<i64>,
    duration_ms: Histogram<f64>,
}

#[cfg(feature = "metrics")]
static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = INSTRUMENTS.set(Instruments {
        calls: meter
            .u64_counter("calls")
            .with_description("Dispatched calls")
            .build(),
        errors: meter
            .u64_counter("errors")
            .with_description("Calls that ended with a non-OK status")
            .build(),
        inflight: meter
            .i64_up_down_counter("calls_inflight")
            .with_description("Calls whose handler is still running")
            .build(),
        duration_ms: meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("Handler start to terminal status")
            .build(),
    });
}

/// Feeds dispatcher lifecycle events into the metric instruments.
///
/// Without the `metrics` feature every callback is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsObserver;

impl CallObserver for MetricsObserver {
    #[cfg(feature = "metrics")]
    fn call_started(&self, operation: &str, shape: Shape) {
        if let Some(m) = INSTRUMENTS.get() {
            let attrs = attributes(operation, shape);
            m.calls.add(1, &attrs);
            m.inflight.add(1, &attrs);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn call_started(&self, _operation: &str, _shape: Shape) {}

    #[cfg(feature = "metrics")]
    fn call_finished(&self, operation: &str, shape: Shape, code: Code, elapsed: Duration) {
        if let Some(m) = INSTRUMENTS.get() {
            let attrs = attributes(operation, shape);
            m.inflight.add(-1, &attrs);
            if code != Code::Ok {
                let mut with_code = attrs.clone();
                with_code.push(KeyValue::new("code", format!("{code:?}")));
                m.errors.add(1, &with_code);
            }
            m.duration_ms.record(elapsed.as_secs_f64() * 1000.0, &attrs);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn call_finished(&self, _operation: &str, _shape: Shape, code: Code, elapsed: Duration) {
        if code != Code::Ok {
            tracing::debug!("Call failed with {:?} after {:?}", code, elapsed);
        }
    }
}

#[cfg(feature = "metrics")]
fn attributes(operation: &str, shape: Shape) -> Vec<KeyValue> {
    vec![
        KeyValue::new("operation", operation.to_owned()),
        KeyValue::new("shape", shape.to_string()),
    ]
}
