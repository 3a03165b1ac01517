//! Percentile latency tracking using HDR Histogram.
//!
//! Backs the `http_req_duration` metric: the final report's percentile table
//! and every `p(N)`/`avg`/`med` threshold read from here.

use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Upper bound of the histogram: 60 seconds in microseconds.
const MAX_TRACKED_US: u64 = 60_000_000;

/// Percentile statistics for a set of latency measurements.
#[derive(Debug, Clone)]
pub struct PercentileStats {
    /// Number of samples
    pub count: u64,

    /// Minimum value (microseconds)
    pub min: u64,

    /// Maximum value (microseconds)
    pub max: u64,

    /// Mean/average value (microseconds)
    pub mean: f64,

    /// 50th percentile - median (microseconds)
    pub p50: u64,

    /// 90th percentile (microseconds)
    pub p90: u64,

    /// 95th percentile (microseconds)
    pub p95: u64,

    /// 99th percentile (microseconds)
    pub p99: u64,

    /// 99.9th percentile (microseconds)
    pub p99_9: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }

    /// Format statistics as a compact table row.
    pub fn format_table_row(&self, label: &str) -> String {
        format!(
            "{:<30} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            label,
            self.count,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
            self.mean / 1000.0,
            self.max as f64 / 1000.0,
        )
    }
}

/// Thread-safe percentile tracker.
///
/// All latencies are stored in microseconds, from 1μs to 60s with 3
/// significant digits.
#[derive(Clone)]
pub struct PercentileTracker {
    histogram: Arc<Mutex<Histogram<u64>>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_US, 3)
            .expect("Failed to create histogram");

        Self {
            histogram: Arc::new(Mutex::new(histogram)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Histogram<u64>> {
        match self.histogram.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a latency measurement in milliseconds.
    pub fn record_ms(&self, latency_ms: u64) {
        self.record_us(latency_ms.saturating_mul(1000));
    }

    /// Record a latency measurement in microseconds.
    pub fn record_us(&self, latency_us: u64) {
        let mut hist = self.lock();

        let clamped = latency_us.clamp(1, MAX_TRACKED_US);

        if let Err(e) = hist.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    /// Number of recorded samples.
    pub fn count(&self) -> u64 {
        self.lock().len()
    }

    /// Value at percentile `p` (0-100) in milliseconds, `None` without samples.
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        let hist = self.lock();
        if hist.is_empty() {
            return None;
        }
        Some(hist.value_at_percentile(p.clamp(0.0, 100.0)) as f64 / 1000.0)
    }

    /// Mean latency in milliseconds.
    pub fn mean_ms(&self) -> Option<f64> {
        let hist = self.lock();
        if hist.is_empty() {
            return None;
        }
        Some(hist.mean() / 1000.0)
    }

    /// Minimum latency in milliseconds.
    pub fn min_ms(&self) -> Option<f64> {
        let hist = self.lock();
        if hist.is_empty() {
            return None;
        }
        Some(hist.min() as f64 / 1000.0)
    }

    /// Maximum latency in milliseconds.
    pub fn max_ms(&self) -> Option<f64> {
        let hist = self.lock();
        if hist.is_empty() {
            return None;
        }
        Some(hist.max() as f64 / 1000.0)
    }

    /// Get current percentile statistics.
    ///
    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.lock();

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }

    /// Reset all recorded samples.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Format percentile statistics as a table.
pub fn format_percentile_table(
    title: &str,
    stats_map: &HashMap<String, PercentileStats>,
) -> String {
    if stats_map.is_empty() {
        return format!("## {}\n\nNo data available.\n", title);
    }

    let mut output = String::new();
    output.push_str(&format!("\n## {}\n\n", title));
    output.push_str(&format!(
        "{:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Label", "Count", "P50", "P90", "P95", "P99", "P99.9", "Mean", "Max"
    ));
    output.push_str(&format!(
        "{:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "", "", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)"
    ));
    output.push_str(&"-".repeat(102));
    output.push('\n');

    let mut labels: Vec<_> = stats_map.keys().collect();
    labels.sort();

    for label in labels {
        let stats = &stats_map[label];
        output.push_str(&stats.format_table_row(label));
        output.push('\n');
    }

    output
}
