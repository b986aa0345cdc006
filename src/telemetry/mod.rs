//! Tracing and OpenTelemetry setup.
//!
//! Console logging is always on; when OTLP export is enabled the same
//! spans also flow to a collector (Jaeger, Tempo, ...). Dispatch and
//! scheduler operations are instrumented, so a trace shows one send
//! end to end: settings read, variable resolution, per-channel
//! transport calls.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OTEL_ENABLED` | Enable OpenTelemetry tracing | `false` |
//! | `OTEL_ENDPOINT` | OTLP gRPC endpoint | `http://localhost:4317` |
//! | `OTEL_SERVICE_NAME` | Service name in traces | `atelier-notification-service` |
//! | `OTEL_SAMPLING_RATIO` | Trace sampling ratio (0.0-1.0) | `1.0` |

use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::OtelConfig;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Keeps the tracer provider alive for the life of the process.
pub struct TelemetryGuard {
    _provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The provider flushes its batch exporter when it drops
        if self._provider.is_some() {
            tracing::debug!("Shutting down OpenTelemetry tracer provider");
        }
    }
}

/// Install the global tracing subscriber.
///
/// The fmt console layer and the `RUST_LOG` env filter are always
/// active; with `config.enabled` an OTLP batch-export layer is stacked
/// on top, so the same spans reach the collector.
pub fn init_telemetry(config: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = if config.enabled {
        Some(build_tracer_provider(config)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer("atelier-notification-service"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    match &provider {
        Some(_) => tracing::info!(
            endpoint = %config.endpoint,
            service_name = %config.service_name,
            sampling_ratio = config.sampling_ratio,
            "Tracing initialized with OTLP export"
        ),
        None => tracing::info!("Tracing initialized, OTLP export disabled"),
    }

    Ok(TelemetryGuard {
        _provider: provider,
    })
}

fn build_tracer_provider(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let sampler = match config.sampling_ratio {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r <= 0.0 => Sampler::AlwaysOff,
        r => Sampler::TraceIdRatioBased(r),
    };

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ]);

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build())
}

/// Span attribute helpers for the notification domain.
pub mod attributes {
    use opentelemetry::KeyValue;

    /// Create a KeyValue for the trigger name.
    pub fn trigger(name: &str) -> KeyValue {
        KeyValue::new("notification.trigger", name.to_string())
    }

    /// Create a KeyValue for the delivery channel.
    pub fn channel(name: &str) -> KeyValue {
        KeyValue::new("notification.channel", name.to_string())
    }

    /// Create a KeyValue for the delivery mode.
    pub fn delivery_mode(mode: &str) -> KeyValue {
        KeyValue::new("notification.delivery_mode", mode.to_string())
    }

    /// Create a KeyValue for the order an event is about.
    pub fn order_id(id: &str) -> KeyValue {
        KeyValue::new("order.id", id.to_string())
    }

    /// Create a KeyValue for a scheduled notification row.
    pub fn scheduled_id(id: uuid::Uuid) -> KeyValue {
        KeyValue::new("scheduled.id", id.to_string())
    }

    /// Create a KeyValue for the recipient kind (customer or admin).
    pub fn recipient_kind(kind: &str) -> KeyValue {
        KeyValue::new("notification.recipient_kind", kind.to_string())
    }
}
