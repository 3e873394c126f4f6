//! Thread-safe metric accumulation keyed by (metric key, phase)
//!
//! Virtual users push [`MetricSample`]s into a shared [`MetricsSink`]. Every
//! sample is folded into its accumulator under a single mutex, so final
//! totals always equal the sum of the recorded samples. Distributions keep
//! exact count/sum/min/max next to an HDR histogram used for percentiles.
//!
//! Distribution values are milliseconds; the histogram stores microseconds.

use crate::types::{Outcome, OutcomeClass};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Aggregate of every request sample's latency
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Share of request samples that were true failures
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Request samples of the login and logout calls
pub const LOGIN: &str = "login";
pub const LOGOUT: &str = "logout";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const LOGIN_SUCCESS_RATE: &str = "login_success_rate";
pub const BACKPRESSURE_DROPS: &str = "backpressure_drops";
/// Suffix of the time-to-headers distribution recorded next to each request
pub const WAITING_SUFFIX: &str = ".waiting";

const HISTOGRAM_MAX_MICROS: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIGS: u8 = 3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    #[error("Metric '{key}' is a {existing}, cannot record a {attempted} sample")]
    KindMismatch {
        key: String,
        existing: MetricKind,
        attempted: MetricKind,
    },

    #[error("Histogram error: {0}")]
    Histogram(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Rate,
    Distribution,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Distribution => write!(f, "distribution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Counter(u64),
    Rate(bool),
    Distribution(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Rate(_) => MetricKind::Rate,
            MetricValue::Distribution(_) => MetricKind::Distribution,
        }
    }
}

/// One immutable observation. Samples with an `outcome` are request samples:
/// exactly one is produced per HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_key: String,
    pub phase: String,
    pub value: MetricValue,
    pub timestamp_ms: u64,
    pub outcome: Option<Outcome>,
}

impl MetricSample {
    pub fn counter(key: impl Into<String>, phase: impl Into<String>, n: u64, timestamp_ms: u64) -> Self {
        Self::new(key, phase, MetricValue::Counter(n), timestamp_ms, None)
    }

    pub fn rate(key: impl Into<String>, phase: impl Into<String>, hit: bool, timestamp_ms: u64) -> Self {
        Self::new(key, phase, MetricValue::Rate(hit), timestamp_ms, None)
    }

    pub fn distribution(
        key: impl Into<String>,
        phase: impl Into<String>,
        value_ms: f64,
        timestamp_ms: u64,
    ) -> Self {
        Self::new(key, phase, MetricValue::Distribution(value_ms), timestamp_ms, None)
    }

    /// Latency sample of one HTTP call
    pub fn request(
        key: impl Into<String>,
        phase: impl Into<String>,
        latency_ms: f64,
        timestamp_ms: u64,
        outcome: Outcome,
    ) -> Self {
        Self::new(
            key,
            phase,
            MetricValue::Distribution(latency_ms),
            timestamp_ms,
            Some(outcome),
        )
    }

    fn new(
        key: impl Into<String>,
        phase: impl Into<String>,
        value: MetricValue,
        timestamp_ms: u64,
        outcome: Option<Outcome>,
    ) -> Self {
        Self {
            metric_key: key.into(),
            phase: phase.into(),
            value,
            timestamp_ms,
            outcome,
        }
    }

    pub fn is_request(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone)]
struct DistributionAcc {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    histogram: Histogram<u64>,
}

impl DistributionAcc {
    fn new() -> Result<Self, MetricError> {
        let histogram = Histogram::new_with_bounds(1, HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIGS)
            .map_err(|e| MetricError::Histogram(e.to_string()))?;
        Ok(Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            histogram,
        })
    }

    fn record(&mut self, value_ms: f64) {
        let value_ms = if value_ms.is_finite() { value_ms.max(0.0) } else { 0.0 };
        self.count += 1;
        self.sum += value_ms;
        self.min = self.min.min(value_ms);
        self.max = self.max.max(value_ms);
        let micros = ((value_ms * 1000.0).round() as u64).max(1);
        self.histogram.saturating_record(micros);
    }

    fn merge(&mut self, other: &DistributionAcc) -> Result<(), MetricError> {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.histogram
            .add(&other.histogram)
            .map_err(|e| MetricError::Histogram(e.to_string()))
    }

    fn stats(&self) -> DistributionStats {
        if self.count == 0 {
            return DistributionStats::default();
        }
        let quantile = |q: f64| self.histogram.value_at_quantile(q) as f64 / 1000.0;
        DistributionStats {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
            p50: quantile(0.50),
            p90: quantile(0.90),
            p95: quantile(0.95),
            p99: quantile(0.99),
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Counter { total: u64, samples: u64 },
    Rate { hits: u64, total: u64 },
    Distribution(DistributionAcc),
}

impl Accumulator {
    fn for_kind(kind: MetricKind) -> Result<Self, MetricError> {
        Ok(match kind {
            MetricKind::Counter => Accumulator::Counter { total: 0, samples: 0 },
            MetricKind::Rate => Accumulator::Rate { hits: 0, total: 0 },
            MetricKind::Distribution => Accumulator::Distribution(DistributionAcc::new()?),
        })
    }

    fn kind(&self) -> MetricKind {
        match self {
            Accumulator::Counter { .. } => MetricKind::Counter,
            Accumulator::Rate { .. } => MetricKind::Rate,
            Accumulator::Distribution(_) => MetricKind::Distribution,
        }
    }

    fn record(&mut self, value: MetricValue) {
        match (self, value) {
            (Accumulator::Counter { total, samples }, MetricValue::Counter(n)) => {
                *total += n;
                *samples += 1;
            }
            (Accumulator::Rate { hits, total }, MetricValue::Rate(hit)) => {
                *total += 1;
                if hit {
                    *hits += 1;
                }
            }
            (Accumulator::Distribution(acc), MetricValue::Distribution(v)) => acc.record(v),
            // Kinds are checked before recording
            _ => {}
        }
    }

    fn merge(&mut self, other: &Accumulator) -> Result<(), MetricError> {
        match (self, other) {
            (
                Accumulator::Counter { total, samples },
                Accumulator::Counter {
                    total: t,
                    samples: s,
                },
            ) => {
                *total += t;
                *samples += s;
            }
            (Accumulator::Rate { hits, total }, Accumulator::Rate { hits: h, total: t }) => {
                *hits += h;
                *total += t;
            }
            (Accumulator::Distribution(acc), Accumulator::Distribution(o)) => acc.merge(o)?,
            _ => {}
        }
        Ok(())
    }

    fn stats(&self) -> MetricStats {
        match self {
            Accumulator::Counter { total, samples } => MetricStats::Counter {
                total: *total,
                samples: *samples,
            },
            Accumulator::Rate { hits, total } => MetricStats::Rate {
                hits: *hits,
                total: *total,
                rate: if *total > 0 {
                    *hits as f64 / *total as f64
                } else {
                    0.0
                },
            },
            Accumulator::Distribution(acc) => MetricStats::Distribution(acc.stats()),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    acc: Accumulator,
    outcomes: BTreeMap<OutcomeClass, u64>,
    statuses: BTreeMap<u16, u64>,
}

impl Entry {
    fn new(kind: MetricKind) -> Result<Self, MetricError> {
        Ok(Self {
            acc: Accumulator::for_kind(kind)?,
            outcomes: BTreeMap::new(),
            statuses: BTreeMap::new(),
        })
    }

    fn merge(&mut self, other: &Entry) -> Result<(), MetricError> {
        self.acc.merge(&other.acc)?;
        for (class, n) in &other.outcomes {
            *self.outcomes.entry(*class).or_default() += n;
        }
        for (status, n) in &other.statuses {
            *self.statuses.entry(*status).or_default() += n;
        }
        Ok(())
    }

    fn summary(&self, key: &str, phase: Option<&str>) -> MetricSummary {
        MetricSummary {
            key: key.to_string(),
            phase: phase.map(str::to_string),
            stats: self.acc.stats(),
            outcomes: self.outcomes.clone(),
            statuses: self.statuses.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct SinkState {
    entries: BTreeMap<(String, String), Entry>,
    request_samples: u64,
}

impl SinkState {
    fn entry(&mut self, key: &str, phase: &str, kind: MetricKind) -> Result<&mut Entry, MetricError> {
        let entry = match self.entries.entry((key.to_string(), phase.to_string())) {
            btree_map::Entry::Occupied(slot) => slot.into_mut(),
            btree_map::Entry::Vacant(slot) => slot.insert(Entry::new(kind)?),
        };
        if entry.acc.kind() != kind {
            return Err(MetricError::KindMismatch {
                key: key.to_string(),
                existing: entry.acc.kind(),
                attempted: kind,
            });
        }
        Ok(entry)
    }
}

/// Shared accumulator for a run. Create one per run and hand an `Arc` of it
/// to every virtual user.
#[derive(Debug, Default)]
pub struct MetricsSink {
    state: Mutex<SinkState>,
    sample_log: Option<Mutex<Vec<MetricSample>>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep every recorded sample, for export and inspection
    pub fn with_sample_log() -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            sample_log: Some(Mutex::new(Vec::new())),
        }
    }

    /// Fold a sample into its accumulator. Request samples also feed the
    /// step's outcome breakdown, `http_req_duration` and `http_req_failed`.
    pub fn record(&self, sample: MetricSample) -> Result<(), MetricError> {
        {
            let mut state = self.state.lock();
            let kind = sample.value.kind();

            if let Some(outcome) = sample.outcome {
                if kind != MetricKind::Distribution {
                    return Err(MetricError::KindMismatch {
                        key: sample.metric_key.clone(),
                        existing: MetricKind::Distribution,
                        attempted: kind,
                    });
                }
                // Check all three targets before touching any of them
                state.entry(HTTP_REQ_DURATION, &sample.phase, MetricKind::Distribution)?;
                state.entry(HTTP_REQ_FAILED, &sample.phase, MetricKind::Rate)?;

                let entry = state.entry(&sample.metric_key, &sample.phase, kind)?;
                entry.acc.record(sample.value);
                *entry.outcomes.entry(outcome.class()).or_default() += 1;
                if let Some(status) = outcome.status() {
                    *entry.statuses.entry(status).or_default() += 1;
                }

                state
                    .entry(HTTP_REQ_DURATION, &sample.phase, MetricKind::Distribution)?
                    .acc
                    .record(sample.value);
                state
                    .entry(HTTP_REQ_FAILED, &sample.phase, MetricKind::Rate)?
                    .acc
                    .record(MetricValue::Rate(outcome.is_failure()));
                state.request_samples += 1;
            } else {
                state
                    .entry(&sample.metric_key, &sample.phase, kind)?
                    .acc
                    .record(sample.value);
            }
        }

        if let Some(log) = &self.sample_log {
            log.lock().push(sample);
        }
        Ok(())
    }

    /// Number of request samples recorded so far
    pub fn request_sample_count(&self) -> u64 {
        self.state.lock().request_samples
    }

    /// Snapshot of the sample log; empty unless built with `with_sample_log`
    pub fn samples(&self) -> Vec<MetricSample> {
        self.sample_log
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Summarise everything recorded so far. Called mid-run this is a
    /// best-effort snapshot: the lock is only held while accumulators are
    /// cloned, never while percentiles are computed.
    pub fn report(&self) -> Summary {
        let (entries, request_samples) = {
            let state = self.state.lock();
            (state.entries.clone(), state.request_samples)
        };

        let mut per_phase = Vec::with_capacity(entries.len());
        let mut merged: BTreeMap<String, Entry> = BTreeMap::new();
        let mut phases = BTreeSet::new();

        for ((key, phase), entry) in &entries {
            per_phase.push(entry.summary(key, Some(phase)));
            phases.insert(phase.clone());
            match merged.get_mut(key) {
                Some(total) => {
                    if let Err(e) = total.merge(entry) {
                        tracing::warn!(metric = %key, error = %e, "Failed to merge metric across phases");
                    }
                }
                None => {
                    merged.insert(key.clone(), entry.clone());
                }
            }
        }

        let histograms = merged
            .iter()
            .filter_map(|(key, entry)| match &entry.acc {
                Accumulator::Distribution(acc) if acc.count > 0 => {
                    Some((key.clone(), acc.histogram.clone()))
                }
                _ => None,
            })
            .collect();

        Summary {
            entries: per_phase,
            totals: merged
                .iter()
                .map(|(key, entry)| entry.summary(key, None))
                .collect(),
            phases: phases.into_iter().collect(),
            request_samples,
            histograms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricStats {
    Counter { total: u64, samples: u64 },
    Rate { hits: u64, total: u64, rate: f64 },
    Distribution(DistributionStats),
}

impl MetricStats {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricStats::Counter { .. } => MetricKind::Counter,
            MetricStats::Rate { .. } => MetricKind::Rate,
            MetricStats::Distribution(_) => MetricKind::Distribution,
        }
    }

    /// Number of samples behind these stats
    pub fn count(&self) -> u64 {
        match self {
            MetricStats::Counter { samples, .. } => *samples,
            MetricStats::Rate { total, .. } => *total,
            MetricStats::Distribution(d) => d.count,
        }
    }

    /// Summed counter value; `None` for other kinds
    pub fn counter_total(&self) -> Option<u64> {
        match self {
            MetricStats::Counter { total, .. } => Some(*total),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub key: String,
    /// `None` for cross-phase totals
    pub phase: Option<String>,
    pub stats: MetricStats,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub outcomes: BTreeMap<OutcomeClass, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub statuses: BTreeMap<u16, u64>,
}

impl MetricSummary {
    pub fn failures(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|(class, _)| class.is_failure())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn expected_negatives(&self) -> u64 {
        self.outcomes
            .get(&OutcomeClass::ExpectedNegative)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub entries: Vec<MetricSummary>,
    pub totals: Vec<MetricSummary>,
    pub phases: Vec<String>,
    pub request_samples: u64,
    /// Merged histograms behind the distribution totals
    #[serde(skip)]
    histograms: BTreeMap<String, Histogram<u64>>,
}

impl Summary {
    pub fn total(&self, key: &str) -> Option<&MetricSummary> {
        self.totals.iter().find(|m| m.key == key)
    }

    pub fn entry(&self, key: &str, phase: &str) -> Option<&MetricSummary> {
        self.entries
            .iter()
            .find(|m| m.key == key && m.phase.as_deref() == Some(phase))
    }

    pub fn for_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a MetricSummary> {
        self.entries
            .iter()
            .filter(move |m| m.phase.as_deref() == Some(phase))
    }

    /// Counter total, or 0 when the counter never fired
    pub fn counter(&self, key: &str) -> u64 {
        self.total(key)
            .and_then(|m| m.stats.counter_total())
            .unwrap_or(0)
    }

    pub fn rate(&self, key: &str) -> Option<f64> {
        match self.total(key).map(|m| &m.stats) {
            Some(MetricStats::Rate { rate, .. }) => Some(*rate),
            _ => None,
        }
    }

    pub fn distribution(&self, key: &str) -> Option<&DistributionStats> {
        match self.total(key).map(|m| &m.stats) {
            Some(MetricStats::Distribution(d)) => Some(d),
            _ => None,
        }
    }

    /// Value in ms at `quantile` (0.0..=1.0) of a distribution's merged
    /// histogram. `None` for other kinds, empty distributions and summaries
    /// read back from JSON.
    pub fn quantile(&self, key: &str, quantile: f64) -> Option<f64> {
        let histogram = self.histograms.get(key)?;
        Some(histogram.value_at_quantile(quantile.clamp(0.0, 1.0)) as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_request_sample_feeds_builtins() {
        let sink = MetricsSink::new();
        sink.record(MetricSample::request(
            "search",
            "NORMAL",
            12.5,
            100,
            Outcome::Success { status: 200 },
        ))
        .unwrap();
        sink.record(MetricSample::request(
            "search",
            "NORMAL",
            30.0,
            200,
            Outcome::ExpectedNegative { status: 404 },
        ))
        .unwrap();
        sink.record(MetricSample::request("search", "NORMAL", 5000.0, 300, Outcome::Timeout))
            .unwrap();

        let summary = sink.report();
        let search = summary.entry("search", "NORMAL").unwrap();
        assert_eq!(search.stats.count(), 3);
        assert_eq!(search.failures(), 1);
        assert_eq!(search.expected_negatives(), 1);
        assert_eq!(search.statuses.get(&404), Some(&1));

        let failed = summary.rate(HTTP_REQ_FAILED).unwrap();
        assert!((failed - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.distribution(HTTP_REQ_DURATION).unwrap().count, 3);
        assert_eq!(summary.request_samples, 3);
    }

    #[test]
    fn test_distribution_stats() {
        let sink = MetricsSink::new();
        for v in 1..=100 {
            sink.record(MetricSample::distribution("latency", "default", v as f64, 0))
                .unwrap();
        }
        let stats = *sink.report().distribution("latency").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.mean - 50.5).abs() < 1e-9);
        assert!((stats.p50 - 50.0).abs() < 0.1);
        assert!((stats.p95 - 95.0).abs() < 0.1);
        assert!((stats.p99 - 99.0).abs() < 0.1);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let sink = MetricsSink::new();
        sink.record(MetricSample::counter("iterations", "default", 1, 0))
            .unwrap();
        let err = sink
            .record(MetricSample::rate("iterations", "default", true, 0))
            .unwrap_err();
        assert!(matches!(err, MetricError::KindMismatch { .. }));
        assert_eq!(sink.report().counter("iterations"), 1);
    }

    #[test]
    fn test_phase_counts_sum_to_totals() {
        let sink = MetricsSink::new();
        let phases = ["NORMAL", "DEGRADED", "RECOVERY"];
        for i in 0..300u64 {
            let phase = phases[(i % 3) as usize];
            sink.record(MetricSample::request(
                "login",
                phase,
                (i % 50) as f64,
                i,
                Outcome::Success { status: 200 },
            ))
            .unwrap();
        }

        let summary = sink.report();
        let per_phase: u64 = summary
            .entries
            .iter()
            .filter(|m| m.key == "login")
            .map(|m| m.stats.count())
            .sum();
        assert_eq!(per_phase, 300);
        assert_eq!(summary.total("login").unwrap().stats.count(), 300);
        assert_eq!(summary.phases.len(), 3);
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        sink.record(MetricSample::counter(ITERATIONS, "default", 1, i))
                            .unwrap();
                        sink.record(MetricSample::request(
                            "search",
                            if t % 2 == 0 { "A" } else { "B" },
                            1.0,
                            i,
                            Outcome::Success { status: 200 },
                        ))
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let summary = sink.report();
        assert_eq!(summary.counter(ITERATIONS), 8000);
        assert_eq!(summary.total("search").unwrap().stats.count(), 8000);
        assert_eq!(summary.request_samples, 8000);
    }

    #[test]
    fn test_sample_log() {
        let sink = MetricsSink::with_sample_log();
        sink.record(MetricSample::rate(LOGIN_SUCCESS_RATE, "default", true, 5))
            .unwrap();
        sink.record(MetricSample::request(
            "login",
            "default",
            4.0,
            5,
            Outcome::Success { status: 200 },
        ))
        .unwrap();

        let samples = sink.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.iter().filter(|s| s.is_request()).count(), 1);
        assert!(MetricsSink::new().samples().is_empty());
    }

    #[test]
    fn test_report_midrun_is_snapshot() {
        let sink = MetricsSink::new();
        sink.record(MetricSample::counter(ITERATIONS, "default", 2, 0))
            .unwrap();
        let before = sink.report();
        sink.record(MetricSample::counter(ITERATIONS, "default", 3, 1))
            .unwrap();
        assert_eq!(before.counter(ITERATIONS), 2);
        assert_eq!(sink.report().counter(ITERATIONS), 5);
    }

    #[test]
    fn test_counter_count_is_samples_not_sum() {
        let sink = MetricsSink::new();
        sink.record(MetricSample::counter(ITERATIONS, "default", 2, 0))
            .unwrap();
        sink.record(MetricSample::counter(ITERATIONS, "default", 3, 1))
            .unwrap();

        let summary = sink.report();
        let stats = &summary.total(ITERATIONS).unwrap().stats;
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.counter_total(), Some(5));
    }

    #[test]
    fn test_quantile_reads_merged_histogram() {
        let sink = MetricsSink::new();
        for v in 1..=1000u64 {
            let phase = if v % 2 == 0 { "NORMAL" } else { "DEGRADED" };
            sink.record(MetricSample::distribution("latency", phase, v as f64, v))
                .unwrap();
        }
        sink.record(MetricSample::counter(ITERATIONS, "default", 1, 0))
            .unwrap();

        let summary = sink.report();
        let p75 = summary.quantile("latency", 0.75).unwrap();
        assert!((p75 - 750.0).abs() < 1.0, "p75 {}", p75);
        let p999 = summary.quantile("latency", 0.999).unwrap();
        assert!((p999 - 999.0).abs() < 1.0, "p99.9 {}", p999);
        assert_eq!(summary.quantile(ITERATIONS, 0.5), None);
        assert_eq!(summary.quantile("missing", 0.5), None);
    }
}
