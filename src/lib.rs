// SPDX-License-Identifier: MIT
//! OpenTelemetry demo service and the harness that verifies its telemetry.
//!
//! The service side is a small axum application ([`http`]) with a fixed-rate
//! temperature recorder ([`recorder`]) persisting through an in-memory repository
//! ([`repository`], [`service`]). Traces, metrics and logs go out over OTLP/HTTP as
//! configured by [`telemetry`].
//!
//! The harness side starts a Grafana LGTM container and an OpenTelemetry Collector
//! ([`containers::stack`]), coordinating each container group under one shared
//! deadline ([`readiness`]), and polls the backends until exported data shows up
//! ([`poll`]).
//!
//! # Feature Flags
//! * `console-log` – add a compact console formatter (file/line/thread id).
//! * `otlp-log` – enable an OTLP log exporter and bridge tracing events into logs.
//!
//! # Quick Start
//! ```no_run
//! use otel_demo::telemetry::{init_telemetry, TelemetryConfig};
//! fn main() -> anyhow::Result<()> {
//!     let handle = init_telemetry(TelemetryConfig::default())?;
//!     // business logic
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod containers;
pub mod entity;
pub mod error;
pub mod generator;
pub mod http;
pub mod metrics;
pub mod poll;
pub mod readiness;
pub mod recorder;
pub mod repository;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod tests {
    use super::telemetry::{init_telemetry, TelemetryConfig};

    #[tokio::test]
    async fn telemetry_init_works() {
        let cfg = TelemetryConfig::from_lookup(|_| None);
        let handle = init_telemetry(cfg).expect("telemetry init");
        tracing::info!("telemetry smoke test");
        // Nothing listens on the default endpoint, so the final flush may fail.
        let _ = handle.shutdown();
    }
}
