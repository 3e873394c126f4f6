//! Fixed-window error monitor that can stop a run early
//!
//! Every step execution is observed with the elapsed run time. Critical
//! failures (transport faults and 5xx) increment the current window's count;
//! the window resets once `window` has passed since it opened. When the count
//! exceeds `error_threshold` the policy moves to `Aborted`, which is terminal.

use loadrig_core::PhaseDefinition;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortState {
    Running,
    Aborted,
}

impl std::fmt::Display for AbortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortState::Running => write!(f, "running"),
            AbortState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Base thresholds; phases may override either field while active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortThresholds {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub error_threshold: u32,
}

impl Default for AbortThresholds {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            error_threshold: 100,
        }
    }
}

impl AbortThresholds {
    /// Thresholds in effect while `phase` is active
    pub fn for_phase(&self, phase: &PhaseDefinition) -> Self {
        let overrides = &phase.threshold_overrides;
        Self {
            window: overrides.window.unwrap_or(self.window),
            error_threshold: overrides.error_threshold.unwrap_or(self.error_threshold),
        }
    }
}

/// Counter state of the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortWindow {
    pub window_start_ms: u64,
    pub error_count: u32,
    pub window_size_ms: u64,
    pub error_threshold: u32,
}

/// Why and when a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRecord {
    pub reason: String,
    pub elapsed_ms: u64,
    pub phase: String,
    pub window: AbortWindow,
}

struct AbortInner {
    state: AbortState,
    window: AbortWindow,
    record: Option<AbortRecord>,
}

/// Thread-safe abort policy shared by every virtual user
#[derive(Clone)]
pub struct AbortPolicy {
    thresholds: AbortThresholds,
    enabled: bool,
    inner: Arc<Mutex<AbortInner>>,
    signal: Arc<watch::Sender<Option<AbortRecord>>>,
}

impl AbortPolicy {
    pub fn new(thresholds: AbortThresholds) -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            thresholds,
            enabled: true,
            inner: Arc::new(Mutex::new(AbortInner {
                state: AbortState::Running,
                window: AbortWindow {
                    window_start_ms: 0,
                    error_count: 0,
                    window_size_ms: thresholds.window.as_millis() as u64,
                    error_threshold: thresholds.error_threshold,
                },
                record: None,
            })),
            signal: Arc::new(signal),
        }
    }

    /// Policy that observes but never aborts
    pub fn disabled() -> Self {
        let mut policy = Self::new(AbortThresholds::default());
        policy.enabled = false;
        policy
    }

    pub fn thresholds(&self) -> AbortThresholds {
        self.thresholds
    }

    pub fn state(&self) -> AbortState {
        self.inner.lock().state
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == AbortState::Aborted
    }

    pub fn window(&self) -> AbortWindow {
        self.inner.lock().window
    }

    pub fn record(&self) -> Option<AbortRecord> {
        self.inner.lock().record.clone()
    }

    /// Receiver that flips to `Some(record)` on abort
    pub fn subscribe(&self) -> watch::Receiver<Option<AbortRecord>> {
        self.signal.subscribe()
    }

    /// Observe one step execution at `now_ms` into the run
    pub fn observe(&self, now_ms: u64, critical: bool, phase: &PhaseDefinition) -> AbortState {
        let thresholds = self.thresholds.for_phase(phase);
        let mut inner = self.inner.lock();
        if inner.state == AbortState::Aborted {
            return AbortState::Aborted;
        }

        inner.window.window_size_ms = thresholds.window.as_millis() as u64;
        inner.window.error_threshold = thresholds.error_threshold;

        if now_ms.saturating_sub(inner.window.window_start_ms) > inner.window.window_size_ms {
            debug!(
                errors = inner.window.error_count,
                window_start_ms = inner.window.window_start_ms,
                "Abort window reset"
            );
            inner.window.error_count = 0;
            inner.window.window_start_ms = now_ms;
        }

        if critical {
            inner.window.error_count += 1;
        }

        if self.enabled && inner.window.error_count > inner.window.error_threshold {
            let record = AbortRecord {
                reason: format!(
                    "{} critical failures within {}ms exceeded threshold of {}",
                    inner.window.error_count,
                    inner.window.window_size_ms,
                    inner.window.error_threshold
                ),
                elapsed_ms: now_ms,
                phase: phase.name.clone(),
                window: inner.window,
            };
            error!(
                phase = %record.phase,
                elapsed_ms = now_ms,
                errors = inner.window.error_count,
                threshold = inner.window.error_threshold,
                "Abort threshold breached, stopping run"
            );
            inner.state = AbortState::Aborted;
            inner.record = Some(record.clone());
            self.signal.send_replace(Some(record));
        }

        inner.state
    }
}

/// Builder for an abort policy
pub struct AbortPolicyBuilder {
    thresholds: AbortThresholds,
    enabled: bool,
}

impl AbortPolicyBuilder {
    pub fn new() -> Self {
        Self {
            thresholds: AbortThresholds::default(),
            enabled: true,
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.thresholds.window = window;
        self
    }

    pub fn error_threshold(mut self, threshold: u32) -> Self {
        self.thresholds.error_threshold = threshold;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> AbortPolicy {
        if self.enabled {
            AbortPolicy::new(self.thresholds)
        } else {
            let mut policy = AbortPolicy::disabled();
            policy.thresholds = self.thresholds;
            policy
        }
    }
}

impl Default for AbortPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
