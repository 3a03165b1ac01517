//! Pass/fail thresholds over the aggregated metrics.
//!
//! A threshold pairs a metric selector (`error_rate`,
//! `error_rate{errorType:contentTypeError}`, `checks`, `http_req_duration`)
//! with an expression such as `rate < 0.01` or `p(95)<200`. Thresholds
//! flagged `abort_on_fail` are watched during the run and stop it on breach,
//! once `delay_abort_eval` has elapsed.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::aggregate::Aggregator;
use crate::errors::ErrorType;
use crate::metrics::THRESHOLDS_BREACHED_TOTAL;

/// How often abort-on-fail thresholds are checked during the run.
pub const DEFAULT_EVAL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors that can occur while parsing a threshold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Unknown metric '{0}'. Expected error_rate, error_rate{{errorType:...}}, checks or http_req_duration")]
    UnknownMetric(String),

    #[error("Invalid threshold expression '{0}'. Expected e.g. 'rate < 0.01' or 'p(95)<200'")]
    InvalidExpression(String),

    #[error("Aggregation '{aggregation}' is not available for metric '{metric}'")]
    UnsupportedAggregation { metric: String, aggregation: String },

    #[error("Invalid percentile {0}. Expected a value between 0 and 100")]
    InvalidPercentile(f64),
}

/// The metric a threshold reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSelector {
    /// Error-rate samples, optionally filtered to one `errorType`
    ErrorRate(Option<ErrorType>),

    /// Fraction of passing checks
    Checks,

    /// HTTP request latency in milliseconds
    HttpReqDuration,
}

impl FromStr for MetricSelector {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static SELECTOR: OnceLock<Regex> = OnceLock::new();
        let re = SELECTOR.get_or_init(|| {
            Regex::new(r"^\s*([a-z_]+)\s*(?:\{\s*errorType\s*:\s*([A-Za-z]+)\s*\})?\s*$")
                .expect("metric selector regex is valid")
        });

        let caps = re
            .captures(s)
            .ok_or_else(|| ThresholdError::UnknownMetric(s.to_string()))?;
        let filter = caps.get(2).map(|m| m.as_str());

        match (&caps[1], filter) {
            ("error_rate", None) => Ok(MetricSelector::ErrorRate(None)),
            ("error_rate", Some(label)) => label
                .parse::<ErrorType>()
                .map(|t| MetricSelector::ErrorRate(Some(t)))
                .map_err(|_| ThresholdError::UnknownMetric(s.to_string())),
            ("checks", None) => Ok(MetricSelector::Checks),
            ("http_req_duration", None) => Ok(MetricSelector::HttpReqDuration),
            _ => Err(ThresholdError::UnknownMetric(s.to_string())),
        }
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSelector::ErrorRate(None) => f.write_str("error_rate"),
            MetricSelector::ErrorRate(Some(t)) => write!(f, "error_rate{{errorType:{}}}", t),
            MetricSelector::Checks => f.write_str("checks"),
            MetricSelector::HttpReqDuration => f.write_str("http_req_duration"),
        }
    }
}

/// Statistic computed over a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }
}

/// `AGGREGATION OP VALUE`, e.g. `rate < 0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpression {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpression {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static EXPRESSION: OnceLock<Regex> = OnceLock::new();
        let re = EXPRESSION.get_or_init(|| {
            Regex::new(
                r"^\s*(rate|count|avg|min|max|med|p\(\s*([0-9]+(?:\.[0-9]+)?)\s*\))\s*(<=|>=|==|!=|<|>)\s*(-?[0-9]+(?:\.[0-9]+)?)\s*$",
            )
            .expect("threshold expression regex is valid")
        });

        let caps = re
            .captures(s)
            .ok_or_else(|| ThresholdError::InvalidExpression(s.to_string()))?;

        let aggregation = match (&caps[1], caps.get(2)) {
            ("rate", _) => Aggregation::Rate,
            ("count", _) => Aggregation::Count,
            ("avg", _) => Aggregation::Avg,
            ("min", _) => Aggregation::Min,
            ("max", _) => Aggregation::Max,
            ("med", _) => Aggregation::Med,
            (_, Some(p)) => {
                let p: f64 = p
                    .as_str()
                    .parse()
                    .map_err(|_| ThresholdError::InvalidExpression(s.to_string()))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ThresholdError::InvalidPercentile(p));
                }
                Aggregation::Percentile(p)
            }
            _ => return Err(ThresholdError::InvalidExpression(s.to_string())),
        };

        let comparison = match &caps[3] {
            "<" => Comparison::Lt,
            "<=" => Comparison::Le,
            ">" => Comparison::Gt,
            ">=" => Comparison::Ge,
            "==" => Comparison::Eq,
            _ => Comparison::Ne,
        };

        let value: f64 = caps[4]
            .parse()
            .map_err(|_| ThresholdError::InvalidExpression(s.to_string()))?;

        Ok(ThresholdExpression {
            aggregation,
            comparison,
            value,
        })
    }
}

/// One configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: MetricSelector,
    pub expression: ThresholdExpression,

    /// Expression as written in the config, for reporting
    pub source: String,

    pub abort_on_fail: bool,

    /// Abort evaluation is skipped until this much of the run has elapsed
    pub delay_abort_eval: Duration,
}

/// Result of evaluating a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    /// Observed value, `None` when the metric has no samples
    pub observed: Option<f64>,
    pub passed: bool,
}

impl Threshold {
    /// Parses a threshold for `metric` from its expression string.
    pub fn parse(
        metric: &str,
        expression: &str,
        abort_on_fail: bool,
        delay_abort_eval: Duration,
    ) -> Result<Self, ThresholdError> {
        let metric_selector: MetricSelector = metric.parse()?;
        let parsed: ThresholdExpression = expression.parse()?;

        let supported = match metric_selector {
            MetricSelector::ErrorRate(_) | MetricSelector::Checks => matches!(
                parsed.aggregation,
                Aggregation::Rate | Aggregation::Count
            ),
            MetricSelector::HttpReqDuration => !matches!(parsed.aggregation, Aggregation::Rate),
        };
        if !supported {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: metric_selector.to_string(),
                aggregation: parsed.aggregation.to_string(),
            });
        }

        Ok(Self {
            metric: metric_selector,
            expression: parsed,
            source: expression.trim().to_string(),
            abort_on_fail,
            delay_abort_eval,
        })
    }

    /// Reads the current value of the threshold's statistic.
    pub fn observe(&self, aggregator: &Aggregator) -> Option<f64> {
        match self.metric {
            MetricSelector::ErrorRate(filter) => {
                let snapshot = match filter {
                    Some(t) => aggregator.error_rate_for(t),
                    None => aggregator.error_rate(),
                };
                match self.expression.aggregation {
                    Aggregation::Count => Some(snapshot.failed as f64),
                    _ => snapshot.failure_rate(),
                }
            }
            MetricSelector::Checks => {
                let snapshot = aggregator.checks();
                match self.expression.aggregation {
                    Aggregation::Count => Some(snapshot.total as f64),
                    _ => snapshot.pass_rate(),
                }
            }
            MetricSelector::HttpReqDuration => {
                let durations = aggregator.request_durations();
                match self.expression.aggregation {
                    Aggregation::Count => Some(durations.count() as f64),
                    Aggregation::Avg => durations.mean_ms(),
                    Aggregation::Min => durations.min_ms(),
                    Aggregation::Max => durations.max_ms(),
                    Aggregation::Med => durations.percentile_ms(50.0),
                    Aggregation::Percentile(p) => durations.percentile_ms(p),
                    Aggregation::Rate => None,
                }
            }
        }
    }

    /// Evaluates the threshold. A metric without samples passes.
    pub fn evaluate(&self, aggregator: &Aggregator) -> ThresholdOutcome {
        let observed = self.observe(aggregator);
        let passed = observed
            .map(|v| self.expression.comparison.holds(v, self.expression.value))
            .unwrap_or(true);
        ThresholdOutcome { observed, passed }
    }
}

/// The default thresholds: latency p95 under 200ms, overall error rate
/// under 1% (aborting), and each error type under 10%.
pub fn default_thresholds() -> Vec<Threshold> {
    let mut thresholds = Vec::new();
    let mut push = |metric: &str, expression: &str, abort: bool, delay: Duration| {
        if let Ok(threshold) = Threshold::parse(metric, expression, abort, delay) {
            thresholds.push(threshold);
        }
    };

    push("http_req_duration", "p(95)<200", false, Duration::ZERO);
    push("error_rate", "rate < 0.01", true, Duration::from_secs(1));
    for error_type in ErrorType::ALL {
        push(
            &format!("error_rate{{errorType:{}}}", error_type.label()),
            "rate < 0.1",
            false,
            Duration::ZERO,
        );
    }
    thresholds
}

/// Returns the first abort-on-fail threshold currently breached, honoring
/// each threshold's `delay_abort_eval` against `elapsed`.
pub fn find_abort_breach<'a>(
    thresholds: &'a [Threshold],
    aggregator: &Aggregator,
    elapsed: Duration,
) -> Option<(&'a Threshold, ThresholdOutcome)> {
    thresholds
        .iter()
        .filter(|t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
        .map(|t| (t, t.evaluate(aggregator)))
        .find(|(_, outcome)| !outcome.passed)
}

/// Periodically evaluates abort-on-fail thresholds and raises the abort
/// signal on the first breach.
///
/// Returns once the abort fires or the run is over (every receiver dropped).
pub async fn watch_thresholds(
    thresholds: Vec<Threshold>,
    aggregator: Aggregator,
    start_time: Instant,
    interval: Duration,
    abort_tx: watch::Sender<bool>,
) {
    if !thresholds.iter().any(|t| t.abort_on_fail) {
        debug!("No abort-on-fail thresholds configured");
        return;
    }

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = abort_tx.closed() => return,
        }

        let elapsed = start_time.elapsed();
        // Counted once by the end-of-run evaluation, not here.
        if let Some((threshold, outcome)) = find_abort_breach(&thresholds, &aggregator, elapsed) {
            error!(
                metric = %threshold.metric,
                threshold = %threshold.source,
                observed = ?outcome.observed,
                elapsed_secs = elapsed.as_secs_f64(),
                "Threshold breached, aborting run"
            );
            let _ = abort_tx.send(true);
            return;
        }
    }
}

/// Evaluates every threshold once, for the end-of-run verdict.
pub fn evaluate_all(
    thresholds: &[Threshold],
    aggregator: &Aggregator,
) -> Vec<(Threshold, ThresholdOutcome)> {
    thresholds
        .iter()
        .map(|t| {
            let outcome = t.evaluate(aggregator);
            if outcome.passed {
                info!(metric = %t.metric, threshold = %t.source, observed = ?outcome.observed, "Threshold passed");
            } else {
                THRESHOLDS_BREACHED_TOTAL
                    .with_label_values(&[&t.metric.to_string()])
                    .inc();
                error!(metric = %t.metric, threshold = %t.source, observed = ?outcome.observed, "Threshold failed");
            }
            (t.clone(), outcome)
        })
        .collect()
}
