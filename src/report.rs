//! End-of-run summary.

use std::collections::HashMap;

use crate::aggregate::{Aggregator, RateSnapshot};
use crate::driver::DriverSummary;
use crate::errors::ErrorType;
use crate::percentiles::format_percentile_table;
use crate::thresholds::{Threshold, ThresholdOutcome};

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

fn rate_line(label: &str, snapshot: &RateSnapshot) -> String {
    format!(
        "  {:<36} {:>8} of {:<8} {}",
        label,
        snapshot.failed,
        snapshot.total,
        percent(snapshot.failure_rate())
    )
}

/// Renders the checks, error rates, latency, iteration counts and
/// threshold verdicts.
pub fn render(
    aggregator: &Aggregator,
    driver: &DriverSummary,
    thresholds: &[(Threshold, ThresholdOutcome)],
) -> String {
    let mut out = String::new();

    out.push_str("\n## Checks\n\n");
    out.push_str(&format!(
        "{:<40} {:>10} {:>10} {:>10}\n",
        "Check", "Passes", "Fails", "Pass %"
    ));
    out.push_str(&format!("{}\n", "-".repeat(73)));
    let breakdown = aggregator.check_breakdown();
    if breakdown.is_empty() {
        out.push_str("No checks ran.\n");
    }
    for (name, snapshot) in &breakdown {
        let mark = if snapshot.failed == 0 { "✓" } else { "✗" };
        out.push_str(&format!(
            "{} {:<38} {:>10} {:>10} {:>10}\n",
            mark,
            name,
            snapshot.passed(),
            snapshot.failed,
            percent(snapshot.pass_rate())
        ));
    }
    let total = aggregator.checks();
    out.push_str(&format!(
        "  {:<38} {:>10} {:>10} {:>10}\n",
        "checks",
        total.passed(),
        total.failed,
        percent(total.pass_rate())
    ));

    out.push_str("\n## Error rate\n\n");
    out.push_str(&format!("{}\n", rate_line("error_rate", &aggregator.error_rate())));
    for error_type in ErrorType::ALL {
        let label = format!("error_rate{{errorType:{}}}", error_type.label());
        out.push_str(&format!(
            "{}\n",
            rate_line(&label, &aggregator.error_rate_for(error_type))
        ));
    }

    let mut latency = HashMap::new();
    if let Some(stats) = aggregator.request_durations().stats() {
        latency.insert("http_req_duration".to_string(), stats);
    }
    out.push_str(&format_percentile_table("Request latency", &latency));

    out.push_str("\n## Iterations\n\n");
    out.push_str(&format!("  started:     {}\n", driver.started));
    out.push_str(&format!("  completed:   {}\n", aggregator.iterations()));
    out.push_str(&format!("  dropped:     {}\n", aggregator.dropped_iterations()));
    out.push_str(&format!("  interrupted: {}\n", driver.interrupted));
    out.push_str(&format!("  pages:       {}\n", aggregator.pages()));
    out.push_str(&format!("  elapsed:     {:.1}s\n", driver.elapsed.as_secs_f64()));
    if driver.aborted {
        out.push_str("  run aborted by threshold\n");
    }

    out.push_str("\n## Thresholds\n\n");
    if thresholds.is_empty() {
        out.push_str("No thresholds configured.\n");
    }
    for (threshold, outcome) in thresholds {
        let mark = if outcome.passed { "✓" } else { "✗" };
        let observed = outcome
            .observed
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "no samples".to_string());
        out.push_str(&format!(
            "{} {:<40} {:<16} observed {}\n",
            mark,
            threshold.metric.to_string(),
            threshold.source,
            observed
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_render_includes_every_section() {
        let agg = Aggregator::new();
        agg.record_check("status 200", true);
        agg.record_check("is ActivityPub", false);
        agg.add_error_sample(false, ErrorType::ContentType);
        agg.record_request_duration(Duration::from_millis(12));
        agg.record_iteration();

        let threshold =
            Threshold::parse("error_rate", "rate < 0.01", true, Duration::from_secs(1)).unwrap();
        let outcome = threshold.evaluate(&agg);
        let summary = DriverSummary {
            started: 1,
            ..Default::default()
        };

        let report = render(&agg, &summary, &[(threshold, outcome)]);
        assert!(report.contains("✓ status 200"));
        assert!(report.contains("✗ is ActivityPub"));
        assert!(report.contains("error_rate{errorType:contentTypeError}"));
        assert!(report.contains("http_req_duration"));
        assert!(report.contains("completed:   1"));
        assert!(report.contains("✗ error_rate"));
        assert!(report.contains("observed 1.0000"));
    }

    #[test]
    fn test_render_empty_run() {
        let report = render(&Aggregator::new(), &DriverSummary::default(), &[]);
        assert!(report.contains("No checks ran."));
        assert!(report.contains("No data available."));
        assert!(report.contains("No thresholds configured."));
    }

    #[test]
    fn test_render_marks_aborted_run() {
        let summary = DriverSummary {
            aborted: true,
            interrupted: 3,
            ..Default::default()
        };
        let report = render(&Aggregator::new(), &summary, &[]);
        assert!(report.contains("interrupted: 3\n"));
        assert!(report.contains("run aborted by threshold"));
    }
}
