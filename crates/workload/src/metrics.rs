//! Fire-and-forget metric emission
//!
//! Components record through the [`MetricClient`] trait. Recording never
//! fails and never blocks, so metrics stay off the launch critical path.
//!
//! - [`OtelMetricClient`] records through the global OpenTelemetry meter
//! - [`InMemoryMetricClient`] keeps values in memory for assertions
//! - [`NoopMetricClient`] discards everything

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Metric names emitted by the engine
pub mod names {
    pub const POLL_COUNT: &str = "workload_launcher.poll.count";
    pub const POLL_ERROR: &str = "workload_launcher.poll.error";
    pub const POLL_CLAIMED: &str = "workload_launcher.poll.claimed";
    pub const LAUNCH_SUCCESS: &str = "workload_launcher.launch.success";
    pub const LAUNCH_FAILURE: &str = "workload_launcher.launch.failure";
    pub const LAUNCH_REQUEUED: &str = "workload_launcher.launch.requeued";
    pub const LAUNCH_SKIPPED: &str = "workload_launcher.launch.skipped";
    pub const QUEUE_POLLING_SUSPENDED: &str = "workload_launcher.queue.polling_suspended";
    pub const QUEUE_DEPTH: &str = "workload_launcher.queue.depth";
}

/// Attribute keys attached to engine metrics
pub mod attrs {
    pub const DATAPLANE_GROUP: &str = "dataplane_group";
    pub const PRIORITY: &str = "priority";
    pub const QUEUE: &str = "queue";
    pub const STAGE: &str = "stage";
    pub const WORKLOAD_TYPE: &str = "workload_type";
}

/// Key/value attributes for one measurement
pub type Attributes<'a> = &'a [(&'static str, &'a str)];

/// Sink for counters and gauges
pub trait MetricClient: Send + Sync + 'static {
    /// Add `value` to a monotonic counter
    fn count(&self, name: &'static str, value: u64, attributes: Attributes<'_>);

    /// Record the current value of a gauge
    fn gauge(&self, name: &'static str, value: u64, attributes: Attributes<'_>);
}

fn key_values(attributes: Attributes<'_>) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(k, v)| KeyValue::new(*k, v.to_string()))
        .collect()
}

/// OpenTelemetry-backed metric client
///
/// Instruments are created on first use and cached by name.
pub struct OtelMetricClient {
    meter: Meter,
    counters: DashMap<&'static str, Counter<u64>>,
    gauges: DashMap<&'static str, Gauge<u64>>,
}

impl OtelMetricClient {
    /// Record through the global meter provider
    pub fn new() -> Self {
        Self::with_meter(opentelemetry::global::meter("workload-launcher"))
    }

    pub fn with_meter(meter: Meter) -> Self {
        Self {
            meter,
            counters: DashMap::new(),
            gauges: DashMap::new(),
        }
    }
}

impl Default for OtelMetricClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricClient for OtelMetricClient {
    fn count(&self, name: &'static str, value: u64, attributes: Attributes<'_>) {
        let counter = self
            .counters
            .entry(name)
            .or_insert_with(|| self.meter.u64_counter(name).build())
            .clone();
        counter.add(value, &key_values(attributes));
    }

    fn gauge(&self, name: &'static str, value: u64, attributes: Attributes<'_>) {
        let gauge = self
            .gauges
            .entry(name)
            .or_insert_with(|| self.meter.u64_gauge(name).build())
            .clone();
        gauge.record(value, &key_values(attributes));
    }
}

type SeriesKey = (&'static str, Vec<(&'static str, String)>);

fn series_key(name: &'static str, attributes: Attributes<'_>) -> SeriesKey {
    let mut attrs: Vec<_> = attributes
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    attrs.sort();
    (name, attrs)
}

/// In-memory metric client for tests
#[derive(Default)]
pub struct InMemoryMetricClient {
    counters: DashMap<SeriesKey, u64>,
    gauges: DashMap<SeriesKey, u64>,
}

impl InMemoryMetricClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all attribute sets
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|entry| entry.key().0 == name)
            .map(|entry| *entry.value())
            .sum()
    }

    /// Value of a counter for exactly these attributes
    pub fn counter(&self, name: &'static str, attributes: Attributes<'_>) -> u64 {
        self.counters
            .get(&series_key(name, attributes))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Last recorded gauge value for exactly these attributes
    pub fn gauge_value(&self, name: &'static str, attributes: Attributes<'_>) -> Option<u64> {
        self.gauges.get(&series_key(name, attributes)).map(|v| *v)
    }
}

impl MetricClient for InMemoryMetricClient {
    fn count(&self, name: &'static str, value: u64, attributes: Attributes<'_>) {
        *self.counters.entry(series_key(name, attributes)).or_default() += value;
    }

    fn gauge(&self, name: &'static str, value: u64, attributes: Attributes<'_>) {
        self.gauges.insert(series_key(name, attributes), value);
    }
}

/// Metric client that drops every measurement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricClient;

impl MetricClient for NoopMetricClient {
    fn count(&self, _name: &'static str, _value: u64, _attributes: Attributes<'_>) {}

    fn gauge(&self, _name: &'static str, _value: u64, _attributes: Attributes<'_>) {}
}
