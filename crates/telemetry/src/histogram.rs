//! Timing histograms.

use prometheus::proto::MetricFamily;
use prometheus::{Histogram, HistogramOpts};
use serde::{Deserialize, Serialize};

/// Default bucket upper bounds, in seconds.
pub const DEFAULT_TIMING_BINS: &[f64] = &[
    0.1, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
    15.0, 20.0,
];

/// Suffix appended to a timing name to form its metric name.
pub(crate) const TIMING_SUFFIX: &str = "_seconds";

/// Build the histogram backing timing `name`. Bounds are sorted and
/// deduplicated; non-finite bounds are dropped.
pub(crate) fn timing_histogram(name: &str, bins: &[f64]) -> prometheus::Result<Histogram> {
    let mut buckets: Vec<f64> = bins.iter().copied().filter(|b| b.is_finite()).collect();
    buckets.sort_by(|a, b| a.total_cmp(b));
    buckets.dedup();
    if buckets.is_empty() {
        buckets = DEFAULT_TIMING_BINS.to_vec();
    }
    Histogram::with_opts(
        HistogramOpts::new(format!("{}{}", name, TIMING_SUFFIX), format!("Timing of {}", name))
            .buckets(buckets),
    )
}

/// Serializable view of a timing histogram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)` in ascending order. Samples above
    /// the last bound are counted only in `samples`.
    pub buckets: Vec<(f64, u64)>,
    pub samples: u64,
    pub sum: f64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }

    /// Samples at or above the last bound.
    pub fn overflow(&self) -> u64 {
        let last = self.buckets.last().map(|(_, count)| *count).unwrap_or(0);
        self.samples.saturating_sub(last)
    }

    /// Snapshot of the first histogram in a gathered family.
    pub(crate) fn from_family(family: &MetricFamily) -> Option<Self> {
        let histogram = family.get_metric().first()?.get_histogram();
        Some(Self {
            buckets: histogram
                .get_bucket()
                .iter()
                .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                .collect(),
            samples: histogram.get_sample_count(),
            sum: histogram.get_sample_sum(),
        })
    }
}
