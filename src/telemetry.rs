// SPDX-License-Identifier: MIT
//! Telemetry initialization helpers (traces and metrics always, optional console logs & OTLP logs).
//!
//! This module wraps OpenTelemetry + `tracing` setup for the demo service:
//!
//! * [`TelemetryConfig`] – endpoint, resource metadata and metric export interval.
//! * [`init_telemetry`] – builds providers, installs the global tracer and meter providers.
//! * [`TelemetryHandle`] – explicit synchronous shutdown/flush.
//! * [`SpanAttributesProcessor`] – stamps fixed attributes on every span at start.
//!
//! Feature flags (Cargo features) influence behavior:
//!
//! * `console-log` – add a compact console formatting layer.
//! * `otlp-log` – enable OTLP log exporter + tracing bridge (converts tracing events to logs).
//!
//! All three signals are sent with the HTTP binary protocol to
//! `{endpoint}/v1/traces`, `{endpoint}/v1/metrics` and `{endpoint}/v1/logs`.
//!
//! # Example
//! ```no_run
//! use otel_demo::telemetry::{init_telemetry, TelemetryConfig};
//! fn main() -> anyhow::Result<()> {
//!     let handle = init_telemetry(TelemetryConfig::default())?;
//!     // ... application logic ...
//!     handle.shutdown()?; // ensure final spans and metrics are exported
//!     Ok(())
//! }
//! ```
//!
//! # Span status
//! `tracing-opentelemetry` maps the `otel.status_code` span field (`"OK"` / `"ERROR"`)
//! onto the exported span status; declare it as `tracing::field::Empty` and record it
//! once the outcome is known.
//!
//! # Threading Model
//! Batch exporters and the periodic metric reader spawn worker threads (using the blocking
//! HTTP client). Construct telemetry inside a Tokio context.
use std::time::Duration;

use anyhow::Result;
use opentelemetry::trace::Span as _;
use opentelemetry::{global, Context, KeyValue};
#[cfg(feature = "otlp-log")]
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
#[cfg(feature = "otlp-log")]
use opentelemetry_otlp::LogExporter;
use opentelemetry_otlp::{MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::error::OTelSdkResult;
#[cfg(feature = "otlp-log")]
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{SdkTracerProvider, Span, SpanData, SpanProcessor};
use opentelemetry_sdk::Resource;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub const TRACER_NAME: &str = "otel-demo";

const DEFAULT_ENDPOINT: &str = "http://localhost:4318";
const DEFAULT_SERVICE_NAME: &str = "otel-demo";
const DEFAULT_SERVICE_NAMESPACE: &str = "otel-demo";
const DEFAULT_METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration used when initializing telemetry.
///
/// Values are sourced from environment variables if available:
/// * `OTEL_EXPORTER_OTLP_ENDPOINT` – base endpoint (e.g. `http://localhost:4318`).
/// * `OTEL_SERVICE_NAME` – service name resource attribute.
/// * `OTEL_SERVICE_NAMESPACE` – service namespace resource attribute.
/// * `RUST_ENV` – deployment environment (added as `deployment.environment`).
///
/// The metric export interval defaults to one minute; tests running against a
/// live collector shorten it so data arrives within their polling windows.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base OTLP endpoint (without per-signal suffix). Example: `http://localhost:4318`.
    pub endpoint: String,
    /// Service name reported in resource attributes (`service.name`).
    pub service_name: String,
    /// Service version reported in resource attributes (`service.version`).
    pub service_version: String,
    /// Service namespace reported in resource attributes (`service.namespace`).
    pub service_namespace: String,
    /// Reported as `deployment.environment`.
    pub environment: String,
    /// How often the periodic reader pushes metrics.
    pub metric_export_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}

impl TelemetryConfig {
    /// Build the configuration from an arbitrary variable source, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            service_name: lookup("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            service_namespace: lookup("OTEL_SERVICE_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAMESPACE.to_string()),
            environment: lookup("RUST_ENV").unwrap_or_else(|| "dev".into()),
            metric_export_interval: DEFAULT_METRIC_EXPORT_INTERVAL,
        }
    }

    /// Per-signal OTLP/HTTP URL, e.g. `signal_url("traces")`.
    pub fn signal_url(&self, signal: &str) -> String {
        format!("{}/v1/{}", self.endpoint.trim_end_matches('/'), signal)
    }

    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("service.version", self.service_version.clone()),
                KeyValue::new("service.namespace", self.service_namespace.clone()),
                KeyValue::new("deployment.environment", self.environment.clone()),
            ])
            .build()
    }
}

/// Adds a fixed set of attributes to every span when it starts.
#[derive(Debug, Clone)]
pub struct SpanAttributesProcessor {
    attributes: Vec<KeyValue>,
}

impl Default for SpanAttributesProcessor {
    fn default() -> Self {
        Self::new(vec![
            KeyValue::new("foo", "OpenTelemetryTracesConfiguration"),
            KeyValue::new("bar", "1"),
        ])
    }
}

impl SpanAttributesProcessor {
    pub fn new(attributes: Vec<KeyValue>) -> Self {
        Self { attributes }
    }
}

impl SpanProcessor for SpanAttributesProcessor {
    fn on_start(&self, span: &mut Span, _cx: &Context) {
        for attribute in &self.attributes {
            span.set_attribute(attribute.clone());
        }
    }

    fn on_end(&self, _span: SpanData) {}

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }
}

/// Handle allowing explicit synchronous shutdown of telemetry providers.
///
/// Dropping the handle without calling [`TelemetryHandle::shutdown`] may result in
/// losing final batches. Always call `shutdown()` just before process exit.
pub struct TelemetryHandle {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    #[cfg(feature = "otlp-log")]
    logger_provider: SdkLoggerProvider,
}

impl TelemetryHandle {
    /// Flush and shutdown all configured telemetry providers.
    ///
    /// Every provider is shut down even if an earlier one fails; the messages of all
    /// failing components are combined into a single `anyhow::Error`.
    pub fn shutdown(self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(e) = self.tracer_provider.shutdown() {
            errs.push(format!("tracer: {e}"));
        }
        if let Err(e) = self.meter_provider.shutdown() {
            errs.push(format!("meter: {e}"));
        }
        #[cfg(feature = "otlp-log")]
        if let Err(e) = self.logger_provider.shutdown() {
            errs.push(format!("logger: {e}"));
        }
        if errs.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(errs.join(", "))
        }
    }
}

/// Initialize traces, metrics and (optionally) logs for the application.
///
/// Installs global tracer and meter providers and a subscriber registry composed of
/// layers (console formatting, OTLP log bridge, OpenTelemetry span layer) depending on
/// enabled Cargo features. Can only be called once per process.
///
/// # Errors
/// Returns an error if any exporter builder fails (e.g. invalid endpoint URL) or a
/// global subscriber is already installed.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<TelemetryHandle> {
    let resource = cfg.resource();

    let span_exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_url("traces"))
        .build()?;

    let metric_exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_url("metrics"))
        .build()?;

    #[cfg(feature = "otlp-log")]
    let log_exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(cfg.signal_url("logs"))
        .build()?;

    // Attribute processor first so the batch processor exports the stamped span.
    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(SpanAttributesProcessor::default())
        .with_batch_exporter(span_exporter)
        .with_resource(resource.clone())
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let reader = PeriodicReader::builder(metric_exporter)
        .with_interval(cfg.metric_export_interval)
        .build();
    let meter_provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource.clone())
        .build();
    global::set_meter_provider(meter_provider.clone());

    #[cfg(feature = "otlp-log")]
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource.clone())
        .build();

    let otel_trace_layer = OpenTelemetryLayer::new(global::tracer(TRACER_NAME));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A `None` layer is a no-op.
    let console_layer = cfg!(feature = "console-log").then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .compact()
    });

    let registry = Registry::default().with(filter).with(console_layer);
    #[cfg(feature = "otlp-log")]
    let registry = registry.with(OpenTelemetryTracingBridge::new(&logger_provider));
    registry.with(otel_trace_layer).try_init()?;

    tracing::info!(
        endpoint = %cfg.endpoint,
        service = %cfg.service_name,
        metric_export_interval = ?cfg.metric_export_interval,
        "telemetry initialized"
    );

    Ok(TelemetryHandle {
        tracer_provider,
        meter_provider,
        #[cfg(feature = "otlp-log")]
        logger_provider,
    })
}
