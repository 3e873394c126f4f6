//! Pass/fail thresholds over summarised metrics
//!
//! Expressions use the familiar `aggregate op value` form:
//! `p(95)<2000`, `avg<800`, `rate<0.1`, `rate>0.9`, `count<=5`.

use crate::error::PlanError;
use crate::metrics::{DistributionStats, MetricStats, MetricSummary, Summary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Rate,
    Count,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Percentile(p) => write!(f, "p({})", p),
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Count => write!(f, "count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
        }
    }
}

/// A parsed `aggregate op value` expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdExpr {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub bound: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregate, self.comparison.as_str(), self.bound)
    }
}

impl FromStr for ThresholdExpr {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| PlanError::InvalidThreshold {
            expression: s.to_string(),
            message: message.to_string(),
        };
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();

        // Two-character operators first so "<=" is not read as "<"
        let (pos, comparison, op_len) = ["<=", ">=", "==", "<", ">"]
            .iter()
            .find_map(|op| {
                compact.find(op).map(|pos| {
                    let cmp = match *op {
                        "<=" => Comparison::Le,
                        ">=" => Comparison::Ge,
                        "==" => Comparison::Eq,
                        "<" => Comparison::Lt,
                        _ => Comparison::Gt,
                    };
                    (pos, cmp, op.len())
                })
            })
            .ok_or_else(|| invalid("missing comparison operator"))?;

        let lhs = &compact[..pos];
        let rhs = &compact[pos + op_len..];

        let aggregate = match lhs {
            "avg" => Aggregate::Avg,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "med" => Aggregate::Med,
            "rate" => Aggregate::Rate,
            "count" => Aggregate::Count,
            _ => {
                let inner = lhs
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| invalid(&format!("unknown aggregate '{}'", lhs)))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| invalid(&format!("invalid percentile '{}'", inner)))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be within 0..=100"));
                }
                Aggregate::Percentile(p)
            }
        };

        let bound: f64 = rhs
            .parse()
            .map_err(|_| invalid(&format!("invalid bound '{}'", rhs)))?;
        if !bound.is_finite() {
            return Err(invalid("bound must be finite"));
        }

        Ok(Self {
            aggregate,
            comparison,
            bound,
        })
    }
}

/// Threshold bound to one metric key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub expr: ThresholdExpr,
}

impl Threshold {
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self, PlanError> {
        Ok(Self {
            metric: metric.into(),
            expr: expression.parse()?,
        })
    }

    /// Evaluate against cross-phase totals. A metric that never received a
    /// sample passes with no observed value, except `count` which reads 0.
    pub fn evaluate(&self, summary: &Summary) -> ThresholdResult {
        let mut result = ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expr.to_string(),
            observed: None,
            passed: true,
            error: None,
        };

        let Some(metric) = summary.total(&self.metric) else {
            if self.expr.aggregate == Aggregate::Count {
                result.observed = Some(0.0);
                result.passed = self.expr.comparison.holds(0.0, self.expr.bound);
            }
            return result;
        };

        match observe(summary, metric, self.expr.aggregate) {
            Some(value) => {
                result.observed = Some(value);
                result.passed = self.expr.comparison.holds(value, self.expr.bound);
            }
            None => {
                result.passed = false;
                result.error = Some(format!(
                    "'{}' is not defined for {} metrics",
                    self.expr.aggregate,
                    metric.stats.kind()
                ));
            }
        }
        result
    }
}

fn observe(summary: &Summary, metric: &MetricSummary, aggregate: Aggregate) -> Option<f64> {
    match (&metric.stats, aggregate) {
        (MetricStats::Counter { total, .. }, Aggregate::Count) => Some(*total as f64),
        (MetricStats::Rate { rate, .. }, Aggregate::Rate) => Some(*rate),
        (MetricStats::Rate { hits, .. }, Aggregate::Count) => Some(*hits as f64),
        (MetricStats::Distribution(d), Aggregate::Count) => Some(d.count as f64),
        (MetricStats::Distribution(d), Aggregate::Avg) => Some(d.mean),
        (MetricStats::Distribution(d), Aggregate::Min) => Some(d.min),
        (MetricStats::Distribution(d), Aggregate::Max) => Some(d.max),
        (MetricStats::Distribution(d), Aggregate::Med) => Some(d.p50),
        (MetricStats::Distribution(d), Aggregate::Percentile(p)) => summary
            .quantile(&metric.key, p / 100.0)
            .or_else(|| reported_percentile(d, p)),
        _ => None,
    }
}

/// Percentiles kept in the stats themselves, for summaries without
/// histograms
fn reported_percentile(d: &DistributionStats, p: f64) -> Option<f64> {
    match p {
        p if p == 50.0 => Some(d.p50),
        p if p == 90.0 => Some(d.p90),
        p if p == 95.0 => Some(d.p95),
        p if p == 99.0 => Some(d.p99),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluate every threshold in order
pub fn evaluate_all(thresholds: &[Threshold], summary: &Summary) -> Vec<ThresholdResult> {
    thresholds.iter().map(|t| t.evaluate(summary)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricSample, MetricsSink, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
    use crate::types::Outcome;

    #[test]
    fn test_parse_expressions() {
        let expr: ThresholdExpr = "p(95)<2000".parse().unwrap();
        assert_eq!(expr.aggregate, Aggregate::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.bound, 2000.0);

        let expr: ThresholdExpr = "rate > 0.9".parse().unwrap();
        assert_eq!(expr.aggregate, Aggregate::Rate);
        assert_eq!(expr.comparison, Comparison::Gt);

        let expr: ThresholdExpr = "count<=5".parse().unwrap();
        assert_eq!(expr.comparison, Comparison::Le);
        assert_eq!(expr.to_string(), "count<=5");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("p95<2000".parse::<ThresholdExpr>().is_err());
        assert!("avg 800".parse::<ThresholdExpr>().is_err());
        assert!("avg<fast".parse::<ThresholdExpr>().is_err());
        assert!("p(150)<1".parse::<ThresholdExpr>().is_err());
    }

    fn summary() -> Summary {
        let sink = MetricsSink::new();
        for i in 0..10 {
            let outcome = if i == 0 {
                Outcome::Timeout
            } else {
                Outcome::Success { status: 200 }
            };
            sink.record(MetricSample::request("login", "default", 100.0 * (i + 1) as f64, 0, outcome))
                .unwrap();
        }
        sink.report()
    }

    #[test]
    fn test_evaluate_against_summary() {
        let summary = summary();

        let passed = Threshold::parse(HTTP_REQ_DURATION, "avg<800").unwrap().evaluate(&summary);
        assert!(passed.passed);
        assert!((passed.observed.unwrap() - 550.0).abs() < 1e-9);

        let failed = Threshold::parse(HTTP_REQ_FAILED, "rate<0.05").unwrap().evaluate(&summary);
        assert!(!failed.passed);
        assert!((failed.observed.unwrap() - 0.1).abs() < 1e-9);

        let p95 = Threshold::parse("login", "p(95)<2000").unwrap().evaluate(&summary);
        assert!(p95.passed);
    }

    #[test]
    fn test_missing_metric_and_kind_mismatch() {
        let summary = summary();

        let missing = Threshold::parse("errors", "rate<0.1").unwrap().evaluate(&summary);
        assert!(missing.passed);
        assert_eq!(missing.observed, None);

        let count = Threshold::parse("errors", "count>0").unwrap().evaluate(&summary);
        assert!(!count.passed);
        assert_eq!(count.observed, Some(0.0));

        let mismatch = Threshold::parse(HTTP_REQ_FAILED, "p(95)<1").unwrap().evaluate(&summary);
        assert!(!mismatch.passed);
        assert!(mismatch.error.is_some());
    }

    #[test]
    fn test_percentile_uses_exact_quantile() {
        let sink = MetricsSink::new();
        for v in 1..=1000 {
            sink.record(MetricSample::distribution("latency", "default", v as f64, 0))
                .unwrap();
        }
        let summary = sink.report();

        let p75 = Threshold::parse("latency", "p(75)<800").unwrap().evaluate(&summary);
        assert!(p75.passed);
        assert!((p75.observed.unwrap() - 750.0).abs() < 1.0);

        let p999 = Threshold::parse("latency", "p(99.9)<995").unwrap().evaluate(&summary);
        assert!(!p999.passed);
        assert!((p999.observed.unwrap() - 999.0).abs() < 1.0);

        let p10 = Threshold::parse("latency", "p(10)<200").unwrap().evaluate(&summary);
        assert!(p10.passed);
        assert!((p10.observed.unwrap() - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_summary_from_json_keeps_reported_percentiles() {
        let json = serde_json::to_string(&summary()).unwrap();
        let restored: Summary = serde_json::from_str(&json).unwrap();

        let p95 = Threshold::parse("login", "p(95)<2000").unwrap().evaluate(&restored);
        assert!(p95.passed);
        assert!(p95.observed.is_some());

        let p75 = Threshold::parse("login", "p(75)<2000").unwrap().evaluate(&restored);
        assert!(!p75.passed);
        assert!(p75.error.is_some());
    }
}
