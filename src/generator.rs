// SPDX-License-Identifier: MIT
//! Synthetic telemetry for demos: a steady trickle of metrics, logs and traced
//! `/hello` calls so dashboards have something to show.
use std::ops::Range;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::InstrumentSettings;
use crate::http::AppState;
use crate::metrics::tagged;

const LOG_PAUSE_MILLIS: Range<u64> = 1000..3000;
const METRIC_PAUSE_MILLIS: Range<u64> = 500..1000;
const HELLO_PAUSE_MILLIS: Range<u64> = 500..1000;
const HISTOGRAM_VALUES: Range<f64> = 1.0..2000.0;
const GAUGE_VALUES: Range<f64> = 0.0..100.0;

pub struct TelemetryGenerator {
    counter: Counter<u64>,
    gauge: Gauge<f64>,
    histogram: Histogram<f64>,
    hello: Option<AppState>,
}

impl TelemetryGenerator {
    pub fn new(meter: &Meter, settings: &InstrumentSettings) -> Self {
        let counter = &settings.counter;
        let gauge = &settings.gauge;
        let histogram = &settings.histogram;
        Self {
            counter: meter
                .u64_counter(counter.name.clone())
                .with_description(counter.description.clone())
                .with_unit(counter.unit.clone())
                .build(),
            gauge: meter
                .f64_gauge(gauge.name.clone())
                .with_description(gauge.description.clone())
                .with_unit(gauge.unit.clone())
                .build(),
            histogram: meter
                .f64_histogram(histogram.instrument.name.clone())
                .with_description(histogram.instrument.description.clone())
                .with_unit(histogram.instrument.unit.clone())
                .with_boundaries(histogram.boundaries.clone())
                .build(),
            hello: None,
        }
    }

    /// Also call the `/hello` handler in a loop, producing request spans.
    pub fn with_hello(mut self, state: AppState) -> Self {
        self.hello = Some(state);
        self
    }

    /// Start every loop. Each handle resolves to its iteration count once `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<u64>> {
        let mut loops = Vec::with_capacity(5);

        loops.push(tokio::spawn(jittered_loop(
            "logging",
            LOG_PAUSE_MILLIS,
            shutdown.clone(),
            |iteration| async move {
                info!("Log message {iteration}");
            },
        )));

        let counter = self.counter;
        let counter_attributes = tagged(&[KeyValue::new("a", "1"), KeyValue::new("b", "2")]);
        loops.push(tokio::spawn(jittered_loop(
            "increment counter",
            METRIC_PAUSE_MILLIS,
            shutdown.clone(),
            move |_| {
                counter.add(1, &counter_attributes);
                async {}
            },
        )));

        let histogram = self.histogram;
        let histogram_attributes = tagged(&[KeyValue::new("b", "2"), KeyValue::new("c", "3")]);
        loops.push(tokio::spawn(jittered_loop(
            "record histogram",
            METRIC_PAUSE_MILLIS,
            shutdown.clone(),
            move |_| {
                let value = rand::thread_rng().gen_range(HISTOGRAM_VALUES);
                histogram.record(value, &histogram_attributes);
                async {}
            },
        )));

        let gauge = self.gauge;
        let gauge_attributes = tagged(&[]);
        loops.push(tokio::spawn(jittered_loop(
            "measure gauge",
            METRIC_PAUSE_MILLIS,
            shutdown.clone(),
            move |_| {
                let value = rand::thread_rng().gen_range(GAUGE_VALUES);
                gauge.record(value, &gauge_attributes);
                async {}
            },
        )));

        if let Some(state) = self.hello {
            loops.push(tokio::spawn(jittered_loop(
                "get /hello",
                HELLO_PAUSE_MILLIS,
                shutdown,
                move |_| {
                    let state = state.clone();
                    async move {
                        state.hello().await;
                    }
                },
            )));
        }

        loops
    }
}

/// Run `body` then sleep a random pause from `pause_millis`, until cancelled.
async fn jittered_loop<F, Fut>(
    what: &'static str,
    pause_millis: Range<u64>,
    shutdown: CancellationToken,
    mut body: F,
) -> u64
where
    F: FnMut(u64) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!(what, "generator loop started");
    let mut iteration = 0;
    loop {
        iteration += 1;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = body(iteration) => {}
        }
        let pause = Duration::from_millis(rand::thread_rng().gen_range(pause_millis.clone()));
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    info!(what, iterations = iteration, "generator loop stopped");
    iteration
}
