//! Warden telemetry context.
//!
//! Components report counts and timings to a [`Telemetry`] value that is
//! constructed once at process start and handed to them as an
//! `Arc<Telemetry>`. Each context owns its own Prometheus [`Registry`], so
//! two engines in the same process (as in tests) keep separate numbers.
//!
//! ```rust
//! use warden_telemetry::Telemetry;
//!
//! let telemetry = Telemetry::new();
//! telemetry.increment("flows_started");
//! {
//!     let _timer = telemetry.start_timer("search_host_time");
//!     // ... timed work ...
//! }
//! assert_eq!(telemetry.counter("flows_started"), 1);
//! assert_eq!(telemetry.snapshot().timings["search_host_time"].samples, 1);
//! assert!(telemetry.export().unwrap().contains("warden_events_total"));
//! ```

#![deny(unsafe_code)]

mod histogram;

pub use histogram::{HistogramSnapshot, DEFAULT_TIMING_BINS};

use histogram::{timing_histogram, TIMING_SUFFIX};
use parking_lot::RwLock;
use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{Encoder, GaugeVec, Histogram, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Metric name prefix used by [`Telemetry::new`].
pub const DEFAULT_PREFIX: &str = "warden";

const EVENTS: &str = "events_total";
const GAUGES: &str = "gauge";
const NAME_LABEL: &str = "name";

/// Named counters, gauges and timing histograms.
pub struct Telemetry {
    registry: Registry,
    prefix: String,
    counters: IntCounterVec,
    gauges: GaugeVec,
    timings: RwLock<HashMap<String, Histogram>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX).expect("default telemetry metrics are valid")
    }

    /// Create a context whose metrics are exported as `<prefix>_<name>`.
    pub fn with_prefix(prefix: &str) -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(prefix.to_string()), None)?;

        let counters = IntCounterVec::new(
            Opts::new(EVENTS, "Warden event counters"),
            &[NAME_LABEL],
        )?;
        registry.register(Box::new(counters.clone()))?;

        let gauges = GaugeVec::new(Opts::new(GAUGES, "Warden gauges"), &[NAME_LABEL])?;
        registry.register(Box::new(gauges.clone()))?;

        Ok(Self {
            registry,
            prefix: prefix.to_string(),
            counters,
            gauges,
            timings: RwLock::new(HashMap::new()),
        })
    }

    /// The underlying registry, for callers adding their own collectors.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ── Counters ─────────────────────────────────────────────────────

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Add `delta` to a counter, creating it at zero on first use.
    pub fn add(&self, name: &str, delta: u64) {
        self.counters.with_label_values(&[name]).inc_by(delta);
    }

    /// Current counter value; unknown counters read as zero.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.with_label_values(&[name]).get()
    }

    // ── Gauges ───────────────────────────────────────────────────────

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.with_label_values(&[name]).set(value);
    }

    /// Current gauge value; unset gauges read as zero.
    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.with_label_values(&[name]).get()
    }

    // ── Timings ──────────────────────────────────────────────────────

    /// Register a timing histogram with custom bucket bounds, in seconds.
    /// Re-registering keeps the existing histogram.
    pub fn register_timing(&self, name: &str, bins: &[f64]) -> prometheus::Result<()> {
        if self.timings.read().contains_key(name) {
            return Ok(());
        }
        let mut timings = self.timings.write();
        if timings.contains_key(name) {
            return Ok(());
        }
        let histogram = timing_histogram(name, bins)?;
        self.registry.register(Box::new(histogram.clone()))?;
        timings.insert(name.to_string(), histogram);
        Ok(())
    }

    /// Record a duration in seconds. Unregistered names use the default bins;
    /// names that are not valid metric names are logged and skipped.
    pub fn record_timing(&self, name: &str, seconds: f64) {
        if let Some(histogram) = self.timings.read().get(name) {
            histogram.observe(seconds);
            return;
        }
        if let Err(e) = self.register_timing(name, DEFAULT_TIMING_BINS) {
            tracing::warn!(timing = name, error = %e, "Timing not recorded");
            return;
        }
        if let Some(histogram) = self.timings.read().get(name) {
            histogram.observe(seconds);
        }
    }

    /// Start a timer that records into `name` when dropped.
    pub fn start_timer<'a>(&'a self, name: &'a str) -> TimerGuard<'a> {
        TimerGuard {
            telemetry: self,
            name,
            started: Instant::now(),
        }
    }

    // ── Export ───────────────────────────────────────────────────────

    /// Every metric in the Prometheus text exposition format.
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Point-in-time copy of every metric, read back from the registry.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let events = format!("{}_{}", self.prefix, EVENTS);
        let gauges = format!("{}_{}", self.prefix, GAUGES);
        let timing_prefix = format!("{}_", self.prefix);

        let mut snapshot = TelemetrySnapshot::default();
        for family in self.registry.gather() {
            let name = family.get_name();
            if name == events {
                for (label, metric) in labelled(&family) {
                    snapshot
                        .counters
                        .insert(label, metric.get_counter().get_value() as u64);
                }
            } else if name == gauges {
                for (label, metric) in labelled(&family) {
                    snapshot.gauges.insert(label, metric.get_gauge().get_value());
                }
            } else if family.get_field_type() == MetricType::HISTOGRAM {
                let timing = name
                    .strip_prefix(&timing_prefix)
                    .and_then(|n| n.strip_suffix(TIMING_SUFFIX));
                if let (Some(timing), Some(histogram)) =
                    (timing, HistogramSnapshot::from_family(&family))
                {
                    snapshot.timings.insert(timing.to_string(), histogram);
                }
            }
        }
        snapshot
    }
}

/// Metrics of a family paired with their `name` label.
fn labelled(family: &MetricFamily) -> impl Iterator<Item = (String, &prometheus::proto::Metric)> {
    family.get_metric().iter().filter_map(|metric| {
        metric
            .get_label()
            .iter()
            .find(|pair| pair.get_name() == NAME_LABEL)
            .map(|pair| (pair.get_value().to_string(), metric))
    })
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("prefix", &self.prefix)
            .field("timings", &self.timings.read().len())
            .finish_non_exhaustive()
    }
}

/// Records the elapsed time into a histogram on drop.
#[must_use = "the timer records when it is dropped"]
pub struct TimerGuard<'a> {
    telemetry: &'a Telemetry,
    name: &'a str,
    started: Instant,
}

impl TimerGuard<'_> {
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.elapsed_secs();
        tracing::trace!(timing = self.name, elapsed_secs = elapsed, "Timer recorded");
        self.telemetry.record_timing(self.name, elapsed);
    }
}

/// Point-in-time copy of every metric.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub timings: BTreeMap<String, HistogramSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let t = Telemetry::new();
        assert_eq!(t.counter("missing"), 0);
        t.increment("a");
        t.add("a", 4);
        assert_eq!(t.counter("a"), 5);
    }

    #[test]
    fn test_concurrent_increments() {
        let t = Arc::new(Telemetry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.increment("hits");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.counter("hits"), 8000);
    }

    #[test]
    fn test_timer_guard_records_on_drop() {
        let t = Telemetry::new();
        t.register_timing("op", &[1.0, 10.0]).unwrap();
        {
            let _timer = t.start_timer("op");
        }
        let snap = t.snapshot();
        assert_eq!(snap.timings["op"].samples, 1);
        assert_eq!(snap.timings["op"].buckets[0], (1.0, 1));
    }

    #[test]
    fn test_register_timing_keeps_existing() {
        let t = Telemetry::new();
        t.register_timing("op", &[1.0]).unwrap();
        t.record_timing("op", 0.5);
        t.register_timing("op", &[2.0, 3.0]).unwrap();
        let snap = t.snapshot();
        assert_eq!(snap.timings["op"].samples, 1);
        assert_eq!(snap.timings["op"].buckets.len(), 1);
    }

    #[test]
    fn test_invalid_timing_name_is_skipped() {
        let t = Telemetry::new();
        t.record_timing("not a metric", 1.0);
        assert!(t.snapshot().timings.is_empty());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = Telemetry::new();
        let b = Telemetry::new();
        a.increment("x");
        assert_eq!(a.counter("x"), 1);
        assert_eq!(b.counter("x"), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let t = Telemetry::new();
        t.increment("x");
        t.set_gauge("active_flows", 3.0);
        assert_eq!(t.gauge("active_flows"), 3.0);
        let json = serde_json::to_string(&t.snapshot()).unwrap();
        assert!(json.contains("\"x\":1"));
        assert!(json.contains("active_flows"));
    }

    #[test]
    fn test_export_uses_prefix() {
        let t = Telemetry::with_prefix("test").unwrap();
        t.increment("flows_started");
        t.record_timing("search_host_time", 0.2);
        let text = t.export().unwrap();
        assert!(text.contains("test_events_total{name=\"flows_started\"} 1"));
        assert!(text.contains("test_search_host_time_seconds_count 1"));
    }
}
