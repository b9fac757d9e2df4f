// SPDX-License-Identifier: MIT
//! Application instruments.
//!
//! Every measurement carries [`common_attributes`] in addition to its own, the way a
//! registry-wide tag set would.
use opentelemetry::metrics::{Counter, Gauge, Meter, UpDownCounter};
use opentelemetry::KeyValue;

pub const METER_NAME: &str = "otel-demo";

/// Attributes attached to every metric recorded by this crate (never to spans).
pub fn common_attributes() -> Vec<KeyValue> {
    vec![
        KeyValue::new("foo", "OpenTelemetryMetricsConfiguration"),
        KeyValue::new("bar", "2"),
    ]
}

/// Merge the common attributes with instrument-specific ones.
pub fn tagged(extra: &[KeyValue]) -> Vec<KeyValue> {
    let mut attributes = common_attributes();
    attributes.extend_from_slice(extra);
    attributes
}

/// Instruments touched by the `/hello` handler.
#[derive(Clone)]
pub struct HelloMetrics {
    up_long_counter: Counter<u64>,
    up_down_counter: UpDownCounter<i64>,
    hello_counter: Counter<u64>,
    gauge: Gauge<u64>,
    counter_attributes: Vec<KeyValue>,
    attributes: Vec<KeyValue>,
}

impl HelloMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            up_long_counter: meter
                .u64_counter("hello.up_long_counter")
                .with_description("hello upLongCounter")
                .build(),
            up_down_counter: meter
                .i64_up_down_counter("hello.up_down_counter")
                .with_description("hello upDownCounter")
                .build(),
            hello_counter: meter
                .u64_counter("hello")
                .with_description("hello counter")
                .build(),
            gauge: meter
                .u64_gauge("hello.gauge")
                .with_description("hello gauge example")
                .with_unit("celsius")
                .build(),
            counter_attributes: tagged(&[KeyValue::new("env", "example")]),
            attributes: common_attributes(),
        }
    }

    /// Count one request; `direction` moves the up/down counter by one step.
    pub fn record_request(&self, direction: i64) {
        self.up_long_counter.add(100, &self.attributes);
        self.up_down_counter.add(direction.signum(), &self.attributes);
        self.hello_counter.add(1, &self.counter_attributes);
    }

    pub fn record_gauge(&self, value: u64) {
        self.gauge.record(value, &self.attributes);
    }
}

/// Metric provider backed by an in-memory exporter, for asserting on exported data.
#[cfg(test)]
pub(crate) mod testing {
    use opentelemetry::metrics::{Meter, MeterProvider as _};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    /// One exported data point, flattened. `value` is the histogram count for histograms.
    #[derive(Clone, Debug, PartialEq)]
    pub(crate) struct ExportedPoint {
        pub name: String,
        pub unit: String,
        pub value: f64,
        pub attributes: Vec<KeyValue>,
        pub bounds: Vec<f64>,
    }

    impl ExportedPoint {
        pub(crate) fn attribute(&self, key: &str) -> Option<String> {
            self.attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.to_string())
        }
    }

    pub(crate) struct MetricsHarness {
        provider: SdkMeterProvider,
        exporter: InMemoryMetricExporter,
    }

    impl MetricsHarness {
        pub(crate) fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let provider = SdkMeterProvider::builder()
                .with_reader(PeriodicReader::builder(exporter.clone()).build())
                .build();
            Self { provider, exporter }
        }

        pub(crate) fn meter(&self) -> Meter {
            self.provider.meter("test")
        }

        /// Flush and return the points of the latest export.
        pub(crate) fn collect(&self) -> Vec<ExportedPoint> {
            self.exporter.reset();
            self.provider.force_flush().expect("flush");
            let mut points = Vec::new();
            for resource in self.exporter.get_finished_metrics().expect("finished metrics") {
                for scope in resource.scope_metrics() {
                    for metric in scope.metrics() {
                        let (name, unit) = (metric.name(), metric.unit());
                        match metric.data() {
                            AggregatedMetrics::F64(data) => {
                                flatten(name, unit, data, |v| v, &mut points)
                            }
                            AggregatedMetrics::U64(data) => {
                                flatten(name, unit, data, |v| v as f64, &mut points)
                            }
                            AggregatedMetrics::I64(data) => {
                                flatten(name, unit, data, |v| v as f64, &mut points)
                            }
                        }
                    }
                }
            }
            points
        }

        /// Every point exported for instrument `name`.
        pub(crate) fn points(&self, name: &str) -> Vec<ExportedPoint> {
            self.collect()
                .into_iter()
                .filter(|point| point.name == name)
                .collect()
        }
    }

    fn flatten<T: Copy>(
        name: &str,
        unit: &str,
        data: &MetricData<T>,
        as_f64: impl Fn(T) -> f64,
        out: &mut Vec<ExportedPoint>,
    ) {
        let point = |value: f64, attributes: Vec<KeyValue>, bounds: Vec<f64>| ExportedPoint {
            name: name.to_string(),
            unit: unit.to_string(),
            value,
            attributes,
            bounds,
        };
        match data {
            MetricData::Gauge(gauge) => out.extend(gauge.data_points().map(|dp| {
                point(as_f64(dp.value()), dp.attributes().cloned().collect(), Vec::new())
            })),
            MetricData::Sum(sum) => out.extend(sum.data_points().map(|dp| {
                point(as_f64(dp.value()), dp.attributes().cloned().collect(), Vec::new())
            })),
            MetricData::Histogram(histogram) => out.extend(histogram.data_points().map(|dp| {
                point(
                    dp.count() as f64,
                    dp.attributes().cloned().collect(),
                    dp.bounds().collect(),
                )
            })),
            MetricData::ExponentialHistogram(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MetricsHarness;
    use super::*;

    #[test]
    fn tagged_keeps_common_attributes_first() {
        let attributes = tagged(&[KeyValue::new("droid", "r2d2")]);
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[0].key.as_str(), "foo");
        assert_eq!(attributes[1].key.as_str(), "bar");
        assert_eq!(attributes[2], KeyValue::new("droid", "r2d2"));
    }

    #[test]
    fn hello_metrics_carry_common_attributes() {
        let harness = MetricsHarness::new();
        let metrics = HelloMetrics::new(&harness.meter());
        metrics.record_request(1);
        metrics.record_request(-7);
        metrics.record_gauge(42);

        let hello = harness.points("hello");
        assert_eq!(hello.len(), 1);
        assert_eq!(hello[0].value, 2.0);
        assert_eq!(
            hello[0].attribute("foo").as_deref(),
            Some("OpenTelemetryMetricsConfiguration")
        );
        assert_eq!(hello[0].attribute("bar").as_deref(), Some("2"));
        assert_eq!(hello[0].attribute("env").as_deref(), Some("example"));

        let long_counter = harness.points("hello.up_long_counter");
        assert_eq!(long_counter[0].value, 200.0);
        assert_eq!(long_counter[0].attribute("env"), None);
        assert_eq!(long_counter[0].attribute("bar").as_deref(), Some("2"));

        // +1 then -1: the magnitude of the step is ignored.
        assert_eq!(harness.points("hello.up_down_counter")[0].value, 0.0);

        let gauge = harness.points("hello.gauge");
        assert_eq!(gauge[0].value, 42.0);
        assert_eq!(gauge[0].unit, "celsius");
    }
}
