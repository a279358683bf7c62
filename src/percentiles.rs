//! Latency tracking using HDR Histogram.
//!
//! Latencies are stored in microseconds, from 1µs up to 60 seconds with three
//! significant digits. VRP polls can take up to the 60s request timeout, so
//! that is the ceiling; longer samples are clamped.

use hdrhistogram::Histogram;
use std::time::Duration;
use tracing::warn;

const MAX_LATENCY_US: u64 = 60_000_000;

/// Summary of the latencies recorded for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, median={:.2}ms, mean={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
            self.count,
            as_ms(self.min),
            as_ms(self.median),
            as_ms(self.mean),
            as_ms(self.p95),
            as_ms(self.p99),
            as_ms(self.max),
        )
    }
}

pub fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Latency histogram for a single label.
///
/// Owned by the outcome collector, so no locking is involved.
pub struct PercentileTracker {
    histogram: Histogram<u64>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        // Constant bounds are always valid.
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)
            .expect("histogram bounds are valid");
        Self { histogram }
    }

    pub fn record(&mut self, latency: Duration) {
        let latency_us = latency.as_micros().min(u64::MAX as u128) as u64;
        let clamped = latency_us.clamp(1, MAX_LATENCY_US);

        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// `None` if nothing was recorded.
    pub fn summary(&self) -> Option<LatencySummary> {
        let hist = &self.histogram;
        if hist.is_empty() {
            return None;
        }

        Some(LatencySummary {
            count: hist.len(),
            min: Duration::from_micros(hist.min()),
            max: Duration::from_micros(hist.max()),
            mean: Duration::from_secs_f64(hist.mean() / 1_000_000.0),
            median: Duration::from_micros(hist.value_at_quantile(0.50)),
            p95: Duration::from_micros(hist.value_at_quantile(0.95)),
            p99: Duration::from_micros(hist.value_at_quantile(0.99)),
        })
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}
