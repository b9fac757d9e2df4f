// SPDX-License-Identifier: MIT
//! Fixed-rate temperature recording.
//!
//! Each tick reads the sensor, persists the reading and publishes it through the
//! `TemperatureRecorder` observable gauge. Ticks are fixed rate: a slow tick does not
//! push later ones back.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Meter, ObservableGauge};
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{info, info_span, warn};

use crate::entity::{Record, Temperature};
use crate::metrics::common_attributes;
use crate::repository::RepositoryError;
use crate::service::TemperatureService;

pub const GAUGE_NAME: &str = "TemperatureRecorder";

pub trait TemperatureSensor: Send + Sync {
    fn read_celsius(&self) -> f64;
}

/// Stand-in for real hardware: uniform readings in `[0, 100)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSensor;

impl TemperatureSensor for RandomSensor {
    fn read_celsius(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

pub struct TemperatureRecorder {
    sensor: Arc<dyn TemperatureSensor>,
    service: TemperatureService,
    last_reading: Arc<AtomicU64>,
    _gauge: ObservableGauge<f64>,
}

impl TemperatureRecorder {
    pub fn new(
        meter: &Meter,
        sensor: Arc<dyn TemperatureSensor>,
        service: TemperatureService,
    ) -> Self {
        let last_reading = Arc::new(AtomicU64::new(f64::NAN.to_bits()));
        let observed = last_reading.clone();
        let attributes = common_attributes();
        let gauge = meter
            .f64_observable_gauge(GAUGE_NAME)
            .with_description(GAUGE_NAME)
            .with_unit("celsius")
            .with_callback(move |observer| {
                let value = f64::from_bits(observed.load(Ordering::Relaxed));
                if !value.is_nan() {
                    observer.observe(value, &attributes);
                }
            })
            .build();

        Self {
            sensor,
            service,
            last_reading,
            _gauge: gauge,
        }
    }

    /// Most recent reading, if any tick has run.
    pub fn last_reading(&self) -> Option<f64> {
        let value = f64::from_bits(self.last_reading.load(Ordering::Relaxed));
        (!value.is_nan()).then_some(value)
    }

    /// Run a single tick inside its own span, marking the span `OK` or `ERROR`.
    pub fn record_once(&self) -> Result<Record<Temperature>, RepositoryError> {
        let span = info_span!("record_temperature", otel.status_code = Empty);
        let _entered = span.enter();
        info!("recording temperature");

        let celsius = self.sensor.read_celsius();
        self.last_reading.store(celsius.to_bits(), Ordering::Relaxed);
        let outcome = self.service.save_temperature(celsius as f32);

        match &outcome {
            Ok(_) => {
                span.record("otel.status_code", "OK");
                info!(celsius, "recording temperature done");
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                warn!(celsius, error = %err, "recording temperature failed");
            }
        }
        outcome
    }

    /// Tick at `period` until `shutdown` fires. The first tick runs immediately.
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        info!(period = ?period, "temperature recorder started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Failures are already logged and reflected in the span status.
                    let _ = self.record_once();
                }
            }
        }
        info!("temperature recorder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::MetricsHarness;
    use crate::repository::{InMemoryRepository, Repository};
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    struct FixedSensor(f64);

    impl TemperatureSensor for FixedSensor {
        fn read_celsius(&self) -> f64 {
            self.0
        }
    }

    fn recorder(
        sensor: impl TemperatureSensor + 'static,
    ) -> (TemperatureRecorder, Arc<InMemoryRepository<Temperature>>) {
        let repository = Arc::new(InMemoryRepository::new());
        let service = TemperatureService::new(repository.clone());
        let provider = SdkMeterProvider::builder().build();
        let recorder = TemperatureRecorder::new(&provider.meter("test"), Arc::new(sensor), service);
        (recorder, repository)
    }

    #[test]
    fn random_sensor_stays_in_range() {
        let sensor = RandomSensor;
        for _ in 0..1000 {
            let value = sensor.read_celsius();
            assert!((0.0..100.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn record_once_persists_and_remembers_reading() {
        let (recorder, repository) = recorder(FixedSensor(36.6));
        assert_eq!(recorder.last_reading(), None);

        let record = recorder.record_once().expect("record");
        assert!((record.value().celsius - 36.6).abs() < 1e-4);
        assert_eq!(recorder.last_reading(), Some(36.6));
        assert_eq!(repository.count(), 1);
    }

    /// 20.5, 21.5, 22.5, ...
    struct WarmingSensor(AtomicU64);

    impl TemperatureSensor for WarmingSensor {
        fn read_celsius(&self) -> f64 {
            20.5 + self.0.fetch_add(1, Ordering::SeqCst) as f64
        }
    }

    #[test]
    fn gauge_reports_the_last_reading() {
        let harness = MetricsHarness::new();
        let service = TemperatureService::new(Arc::new(InMemoryRepository::new()));
        let recorder = TemperatureRecorder::new(
            &harness.meter(),
            Arc::new(WarmingSensor(AtomicU64::new(0))),
            service,
        );
        assert!(harness.points(GAUGE_NAME).is_empty());

        recorder.record_once().expect("first");
        recorder.record_once().expect("second");

        let points = harness.points(GAUGE_NAME);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 21.5);
        assert_eq!(points[0].unit, "celsius");
        assert_eq!(
            points[0].attribute("foo").as_deref(),
            Some("OpenTelemetryMetricsConfiguration")
        );
        assert_eq!(points[0].attribute("bar").as_deref(), Some("2"));
    }

    #[test]
    fn invalid_reading_is_not_persisted() {
        let (recorder, repository) = recorder(FixedSensor(-400.0));
        assert!(matches!(
            recorder.record_once(),
            Err(RepositoryError::Invalid(_))
        ));
        assert_eq!(repository.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_at_fixed_rate_until_cancelled() {
        let (recorder, repository) = recorder(FixedSensor(20.0));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(recorder.run(Duration::from_secs(10), shutdown.clone()));

        // Ticks at 0s, 10s, 20s and 30s.
        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown.cancel();
        task.await.expect("recorder task");

        assert_eq!(repository.count(), 4);
    }
}
