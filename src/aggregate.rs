//! Shared run-wide aggregation of check outcomes.
//!
//! One [`Aggregator`] is created per run and cloned into every virtual user.
//! Error-rate samples go to atomic counters so concurrent iterations never
//! lose an update; the per-check tally and the latency histogram sit behind
//! short mutex sections.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::errors::ErrorType;
use crate::metrics::{
    CHECKS_TOTAL, DROPPED_ITERATIONS_TOTAL, ERROR_RATE_SAMPLES_TOTAL, ITERATIONS_TOTAL,
    PAGES_FETCHED_TOTAL,
};
use crate::percentiles::PercentileTracker;

/// Pass/fail counters behind a single rate.
#[derive(Debug, Default)]
struct RateCounter {
    total: AtomicU64,
    failed: AtomicU64,
}

impl RateCounter {
    fn add(&self, passed: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> RateSnapshot {
        RateSnapshot {
            total: self.total.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a rate metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateSnapshot {
    pub total: u64,
    pub failed: u64,
}

impl RateSnapshot {
    /// Fraction of failing samples, `None` when nothing was recorded.
    pub fn failure_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.failed as f64 / self.total as f64)
        }
    }

    /// Fraction of passing samples, `None` when nothing was recorded.
    pub fn pass_rate(&self) -> Option<f64> {
        self.failure_rate().map(|r| 1.0 - r)
    }

    pub fn passed(&self) -> u64 {
        self.total.saturating_sub(self.failed)
    }
}

#[derive(Default)]
struct Inner {
    error_rate: RateCounter,
    by_type: [RateCounter; 4],
    checks_total: RateCounter,
    checks: Mutex<BTreeMap<String, RateSnapshot>>,
    latency: PercentileTracker,
    iterations: AtomicU64,
    dropped_iterations: AtomicU64,
    pages: AtomicU64,
}

/// Cloneable handle to the run's aggregated metrics.
#[derive(Clone, Default)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one error-rate sample under `error_type`.
    pub fn add_error_sample(&self, passed: bool, error_type: ErrorType) {
        self.inner.error_rate.add(passed);
        self.inner.by_type[error_type.index()].add(passed);

        let result = if passed { "passed" } else { "failed" };
        ERROR_RATE_SAMPLES_TOTAL
            .with_label_values(&[error_type.label(), result])
            .inc();
    }

    /// Records the outcome of a named check.
    pub fn record_check(&self, name: &str, passed: bool) {
        self.inner.checks_total.add(passed);
        {
            let mut checks = self.checks_lock();
            let entry = checks.entry(name.to_string()).or_default();
            entry.total += 1;
            if !passed {
                entry.failed += 1;
            }
        }

        let result = if passed { "passed" } else { "failed" };
        CHECKS_TOTAL.with_label_values(&[name, result]).inc();
    }

    /// Records the duration of one HTTP request.
    pub fn record_request_duration(&self, duration: Duration) {
        self.inner.latency.record_us(duration.as_micros() as u64);
    }

    pub fn record_iteration(&self) {
        self.inner.iterations.fetch_add(1, Ordering::Relaxed);
        ITERATIONS_TOTAL.inc();
    }

    pub fn record_dropped_iteration(&self) {
        self.inner.dropped_iterations.fetch_add(1, Ordering::Relaxed);
        DROPPED_ITERATIONS_TOTAL.inc();
    }

    pub fn record_page(&self) {
        self.inner.pages.fetch_add(1, Ordering::Relaxed);
        PAGES_FETCHED_TOTAL.inc();
    }

    /// Overall error rate across every `errorType`.
    pub fn error_rate(&self) -> RateSnapshot {
        self.inner.error_rate.snapshot()
    }

    /// Error rate for one `errorType` label.
    pub fn error_rate_for(&self, error_type: ErrorType) -> RateSnapshot {
        self.inner.by_type[error_type.index()].snapshot()
    }

    /// Pass/fail counts across all checks.
    pub fn checks(&self) -> RateSnapshot {
        self.inner.checks_total.snapshot()
    }

    /// Pass/fail counts per check name, sorted by name.
    pub fn check_breakdown(&self) -> Vec<(String, RateSnapshot)> {
        self.checks_lock()
            .iter()
            .map(|(name, snapshot)| (name.clone(), *snapshot))
            .collect()
    }

    /// Latency histogram behind `http_req_duration`.
    pub fn request_durations(&self) -> &PercentileTracker {
        &self.inner.latency
    }

    pub fn iterations(&self) -> u64 {
        self.inner.iterations.load(Ordering::Relaxed)
    }

    pub fn dropped_iterations(&self) -> u64 {
        self.inner.dropped_iterations.load(Ordering::Relaxed)
    }

    pub fn pages(&self) -> u64 {
        self.inner.pages.load(Ordering::Relaxed)
    }

    fn checks_lock(&self) -> MutexGuard<'_, BTreeMap<String, RateSnapshot>> {
        match self.inner.checks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
