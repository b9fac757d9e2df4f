// SPDX-License-Identifier: MIT
//! Environment-driven application configuration.
//!
//! Every setting has a default, so running the binary with an empty environment
//! produces a working service that exports to `http://localhost:4318`.
//!
//! | Variable | Default |
//! |---|---|
//! | `OTEL_DEMO_ADDR` | `127.0.0.1:8080` |
//! | `OTEL_DEMO_RECORDER_INTERVAL` | `10s` |
//! | `OTEL_DEMO_SIMULATE_LATENCY` | `true` |
//! | `OTEL_DEMO_GENERATE` | `false` |
//! | `OTEL_DEMO_METRIC_EXPORT_INTERVAL` | `60s` |
//!
//! Telemetry endpoint and resource attributes are read by
//! [`crate::telemetry::TelemetryConfig`].
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::telemetry::TelemetryConfig;

pub const ADDR_VAR: &str = "OTEL_DEMO_ADDR";
pub const RECORDER_INTERVAL_VAR: &str = "OTEL_DEMO_RECORDER_INTERVAL";
pub const SIMULATE_LATENCY_VAR: &str = "OTEL_DEMO_SIMULATE_LATENCY";
pub const GENERATE_VAR: &str = "OTEL_DEMO_GENERATE";
pub const METRIC_EXPORT_INTERVAL_VAR: &str = "OTEL_DEMO_METRIC_EXPORT_INTERVAL";

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_RECORDER_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid duration: {source}")]
    Duration {
        var: &'static str,
        #[source]
        source: humantime::DurationError,
    },
    #[error("{var} must not be zero")]
    ZeroDuration { var: &'static str },
    #[error("{var} is not a valid socket address: {value}")]
    Address { var: &'static str, value: String },
    #[error("{var} must be `true` or `false`, got `{value}`")]
    Flag { var: &'static str, value: String },
    #[error("instrument {field} must not be blank")]
    Blank { field: &'static str },
    #[error("histogram boundaries must be non-empty and strictly increasing")]
    Boundaries,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub telemetry: TelemetryConfig,
    /// Fixed rate of the temperature recorder.
    pub recorder_interval: Duration,
    /// Sleep for a random while around the `/hello` span.
    pub simulate_latency: bool,
    /// Run the synthetic telemetry generator alongside the service.
    pub generate: bool,
    pub instruments: InstrumentSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_raw = lookup(ADDR_VAR).unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let listen = listen_raw.parse().map_err(|_| ConfigError::Address {
            var: ADDR_VAR,
            value: listen_raw.clone(),
        })?;

        let mut telemetry = TelemetryConfig::from_lookup(&lookup);
        if let Some(interval) = duration_var(&lookup, METRIC_EXPORT_INTERVAL_VAR)? {
            telemetry.metric_export_interval = interval;
        }

        let instruments = InstrumentSettings::default();
        instruments.validate()?;

        Ok(Self {
            listen,
            telemetry,
            recorder_interval: duration_var(&lookup, RECORDER_INTERVAL_VAR)?
                .unwrap_or(DEFAULT_RECORDER_INTERVAL),
            simulate_latency: flag_var(&lookup, SIMULATE_LATENCY_VAR)?.unwrap_or(true),
            generate: flag_var(&lookup, GENERATE_VAR)?.unwrap_or(false),
            instruments,
        })
    }
}

fn duration_var<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|source| ConfigError::Duration { var, source })?;
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration { var });
    }
    Ok(Some(duration))
}

fn flag_var<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Flag { var, value: raw }),
        },
    }
}

/// Name, description and unit of a single instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentSpec {
    pub name: String,
    pub description: String,
    pub unit: String,
}

impl InstrumentSpec {
    fn new(name: &str, description: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            unit: unit.to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Blank { field: "name" });
        }
        if self.description.trim().is_empty() {
            return Err(ConfigError::Blank {
                field: "description",
            });
        }
        if self.unit.trim().is_empty() {
            return Err(ConfigError::Blank { field: "unit" });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSpec {
    pub instrument: InstrumentSpec,
    /// Explicit bucket boundaries, doubling as the service level objectives.
    pub boundaries: Vec<f64>,
}

/// Instruments recorded by the synthetic telemetry generator.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentSettings {
    pub counter: InstrumentSpec,
    pub gauge: InstrumentSpec,
    pub histogram: HistogramSpec,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            counter: InstrumentSpec::new("fake_event", "fake event counter", "tasks"),
            gauge: InstrumentSpec::new("fake_temperature", "fake temperature gauge", "celsius"),
            histogram: HistogramSpec {
                instrument: InstrumentSpec::new("fake_duration", "fake duration histogram", "ms"),
                boundaries: vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0],
            },
        }
    }
}

impl InstrumentSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.counter.validate()?;
        self.gauge.validate()?;
        self.histogram.instrument.validate()?;

        let boundaries = &self.histogram.boundaries;
        if boundaries.is_empty() || boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Boundaries);
        }
        Ok(())
    }
}
