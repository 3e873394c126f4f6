//! End-of-run report

use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use colored::*;
use loadrig_core::metrics::{HTTP_REQ_FAILED, LOGIN, LOGOUT};
use loadrig_core::{MetricSample, MetricStats, MetricSummary, Summary, ThresholdResult};
use loadrig_resilience::AbortRecord;
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

/// Failure rate under which a run counts as stable
pub const STABLE_FAILURE_RATE: f64 = 0.05;
/// Failure rate under which a run counts as degrading rather than overloaded
pub const DEGRADING_FAILURE_RATE: f64 = 0.15;

/// Why the schedule stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxDuration,
    Aborted,
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::MaxDuration => write!(f, "max duration reached"),
            StopReason::Aborted => write!(f, "aborted"),
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IterationCounts {
    pub started: u64,
    pub login_failed: u64,
    pub scenario_executed: u64,
    pub halted_by_critical_step: u64,
    pub cancelled: u64,
}

impl IterationCounts {
    /// Iterations that ran to the end, with or without a scenario
    pub fn completed(&self) -> u64 {
        self.login_failed + self.scenario_executed
    }
}

/// Capacity verdict from the failure rate of every HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Stable,
    Degrading,
    Overloaded,
}

impl Verdict {
    pub fn from_failure_rate(rate: f64) -> Self {
        if rate < STABLE_FAILURE_RATE {
            Verdict::Stable
        } else if rate < DEGRADING_FAILURE_RATE {
            Verdict::Degrading
        } else {
            Verdict::Overloaded
        }
    }

    fn colored(&self) -> ColoredString {
        match self {
            Verdict::Stable => "STABLE".bright_green().bold(),
            Verdict::Degrading => "DEGRADING".bright_yellow().bold(),
            Verdict::Overloaded => "OVERLOADED".bright_red().bold(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stop_reason: StopReason,
    pub abort: Option<AbortRecord>,
    pub iterations: IterationCounts,
    pub vus_peak: u32,
    pub vus_allocated_peak: u32,
    pub backpressure_drops: u64,
    pub summary: Summary,
    pub thresholds: Vec<ThresholdResult>,
    /// Share of HTTP calls that failed; 0 when none were made
    pub failure_rate: f64,
    pub verdict: Verdict,
    /// Every recorded sample, when the plan asks for them
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<MetricSample>,
}

impl RunReport {
    /// Fill in the verdict from the summary
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_name: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        stop_reason: StopReason,
        abort: Option<AbortRecord>,
        iterations: IterationCounts,
        summary: Summary,
        thresholds: Vec<ThresholdResult>,
    ) -> Self {
        let failure_rate = summary.rate(HTTP_REQ_FAILED).unwrap_or(0.0);
        Self {
            run_id: Uuid::new_v4(),
            plan_name: plan_name.into(),
            started_at,
            duration_ms,
            stop_reason,
            abort,
            iterations,
            vus_peak: 0,
            vus_allocated_peak: 0,
            backpressure_drops: 0,
            summary,
            thresholds,
            failure_rate,
            verdict: Verdict::from_failure_rate(failure_rate),
            samples: Vec::new(),
        }
    }

    /// Not aborted and every threshold held
    pub fn passed(&self) -> bool {
        self.abort.is_none() && self.thresholds.iter().all(|t| t.passed)
    }

    pub fn to_json(&self) -> Result<String, ExecutionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable report with a per-metric table
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} {}", "Run".bright_cyan().bold(), self.plan_name.bold());
        let _ = writeln!(out, "  id:        {}", self.run_id);
        let _ = writeln!(out, "  started:   {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "  duration:  {:.1}s", self.duration_ms as f64 / 1000.0);
        let _ = writeln!(out, "  stopped:   {}", self.stop_reason);
        if let Some(ref abort) = self.abort {
            let _ = writeln!(
                out,
                "  {} at {}ms in phase {}: {}",
                "ABORTED".bright_red().bold(),
                abort.elapsed_ms,
                abort.phase,
                abort.reason
            );
        }

        let it = &self.iterations;
        let _ = writeln!(
            out,
            "  iterations: {} started, {} executed ({} halted), {} login failed, {} cancelled",
            it.started, it.scenario_executed, it.halted_by_critical_step, it.login_failed, it.cancelled
        );
        let _ = writeln!(
            out,
            "  vus: peak {}, allocated peak {}, backpressure drops {}",
            self.vus_peak, self.vus_allocated_peak, self.backpressure_drops
        );
        out.push('\n');

        let headers = ["metric", "count", "avg", "p50", "p95", "p99", "max", "fail", "neg"];
        let rows: Vec<Vec<String>> = self
            .summary
            .totals
            .iter()
            .filter(|m| is_request_metric(m))
            .map(metric_row)
            .collect();
        render_table(&mut out, &headers, &rows);

        if !self.thresholds.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "{}", "Thresholds".bright_cyan().bold());
            for t in &self.thresholds {
                let mark = if t.passed { "✓".bright_green() } else { "✗".bright_red() };
                let observed = t
                    .observed
                    .map(|v| format!("{:.3}", v))
                    .unwrap_or_else(|| "-".to_string());
                let _ = write!(out, "  {} {} {} (observed {})", mark, t.metric, t.expression, observed);
                if let Some(ref error) = t.error {
                    let _ = write!(out, " {}", error.bright_yellow());
                }
                out.push('\n');
            }
        }

        out.push('\n');
        let _ = writeln!(
            out,
            "Verdict: {} ({:.2}% of requests failed)",
            self.verdict.colored(),
            self.failure_rate * 100.0
        );
        out
    }
}

/// Step keys plus login/logout; the derived and auxiliary metrics are left
/// to the JSON report
fn is_request_metric(metric: &MetricSummary) -> bool {
    !metric.outcomes.is_empty() || metric.key == LOGIN || metric.key == LOGOUT
}

fn metric_row(metric: &MetricSummary) -> Vec<String> {
    let mut row = vec![metric.key.clone()];
    match &metric.stats {
        MetricStats::Distribution(d) => {
            row.push(d.count.to_string());
            for v in [d.mean, d.p50, d.p95, d.p99, d.max] {
                row.push(format!("{:.1}ms", v));
            }
        }
        other => {
            row.push(other.count().to_string());
            row.extend(std::iter::repeat("-".to_string()).take(5));
        }
    }
    row.push(metric.failures().to_string());
    row.push(metric.expected_negatives().to_string());
    row
}

fn render_table(out: &mut String, headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        let _ = writeln!(out, "{}", "No requests recorded".bright_yellow());
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    separator(out, &widths, '┌', '┬', '┐');
    out.push('│');
    for (header, width) in headers.iter().zip(&widths) {
        let _ = write!(out, " {} │", format!("{:width$}", header, width = width).bright_cyan().bold());
    }
    out.push('\n');
    separator(out, &widths, '├', '┼', '┤');
    for row in rows {
        out.push('│');
        for (cell, width) in row.iter().zip(&widths) {
            let _ = write!(out, " {:width$} │", cell, width = width);
        }
        out.push('\n');
    }
    separator(out, &widths, '└', '┴', '┘');
}

fn separator(out: &mut String, widths: &[usize], left: char, mid: char, right: char) {
    out.push(left);
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push(mid);
        }
        out.push_str(&"─".repeat(width + 2));
    }
    out.push(right);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadrig_core::metrics::HTTP_REQ_DURATION;
    use loadrig_core::{evaluate_all, MetricsSink, Outcome, Threshold};

    fn summary_with_failures(ok: u32, failed: u32) -> Summary {
        let sink = MetricsSink::new();
        for i in 0..ok {
            sink.record(MetricSample::request("search", "default", 10.0, i as u64, Outcome::Success { status: 200 }))
                .unwrap();
        }
        for i in 0..failed {
            sink.record(MetricSample::request("search", "default", 10.0, i as u64, Outcome::Timeout))
                .unwrap();
        }
        sink.report()
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(Verdict::from_failure_rate(0.0), Verdict::Stable);
        assert_eq!(Verdict::from_failure_rate(0.049), Verdict::Stable);
        assert_eq!(Verdict::from_failure_rate(0.05), Verdict::Degrading);
        assert_eq!(Verdict::from_failure_rate(0.149), Verdict::Degrading);
        assert_eq!(Verdict::from_failure_rate(0.15), Verdict::Overloaded);
    }

    #[test]
    fn test_report_verdict_from_failed_requests() {
        let report = RunReport::new(
            "capacity",
            Utc::now(),
            1000,
            StopReason::Completed,
            None,
            IterationCounts::default(),
            summary_with_failures(90, 10),
            Vec::new(),
        );
        assert!((report.failure_rate - 0.1).abs() < 1e-9);
        assert_eq!(report.verdict, Verdict::Degrading);
        assert!(report.passed());
    }

    #[test]
    fn test_failed_threshold_fails_report() {
        let summary = summary_with_failures(10, 0);
        let thresholds = vec![Threshold::parse(HTTP_REQ_DURATION, "p(95)<5").unwrap()];
        let results = evaluate_all(&thresholds, &summary);
        let report = RunReport::new(
            "functional",
            Utc::now(),
            1000,
            StopReason::Completed,
            None,
            IterationCounts::default(),
            summary,
            results,
        );
        assert!(!report.passed());

        let text = report.render_text();
        assert!(text.contains("search"));
        assert!(text.contains("p(95)<5"));
    }

    #[test]
    fn test_json_report_fields() {
        let report = RunReport::new(
            "functional",
            Utc::now(),
            2500,
            StopReason::MaxDuration,
            None,
            IterationCounts {
                started: 3,
                scenario_executed: 2,
                cancelled: 1,
                ..Default::default()
            },
            Summary::default(),
            Vec::new(),
        );
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["stop_reason"], "max_duration");
        assert_eq!(json["iterations"]["cancelled"], 1);
        assert_eq!(json["verdict"], "stable");
        assert!(json["abort"].is_null());
    }
}
