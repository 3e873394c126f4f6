//! Named time intervals of a run
//!
//! Phases tag every metric sample and may override the abort thresholds while
//! they are active (e.g. tolerate more errors during a planned DEGRADED
//! window of a failover test).

use crate::error::{PlanError, Result};
use std::time::Duration;

/// Name used when a plan defines no phases
pub const DEFAULT_PHASE: &str = "default";

/// Per-phase overrides for the abort policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdOverrides {
    pub error_threshold: Option<u32>,
    pub window: Option<Duration>,
}

impl ThresholdOverrides {
    pub fn is_empty(&self) -> bool {
        self.error_threshold.is_none() && self.window.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub name: String,
    pub start_offset: Duration,
    pub end_offset: Duration,
    pub threshold_overrides: ThresholdOverrides,
}

impl PhaseDefinition {
    pub fn new(name: impl Into<String>, start_offset: Duration, end_offset: Duration) -> Self {
        Self {
            name: name.into(),
            start_offset,
            end_offset,
            threshold_overrides: ThresholdOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ThresholdOverrides) -> Self {
        self.threshold_overrides = overrides;
        self
    }

    fn contains(&self, elapsed_ms: u64) -> bool {
        let start = self.start_offset.as_millis() as u64;
        let end = self.end_offset.as_millis() as u64;
        elapsed_ms >= start && elapsed_ms < end
    }
}

/// Maps elapsed run time to the active phase
#[derive(Debug, Clone)]
pub struct PhaseClock {
    phases: Vec<PhaseDefinition>,
}

impl PhaseClock {
    /// Phases must be ascending, contiguous and start at 0
    pub fn new(phases: Vec<PhaseDefinition>) -> Result<Self> {
        if phases.is_empty() {
            return Err(PlanError::InvalidPhases(
                "at least one phase is required".to_string(),
            ));
        }
        if phases.len() > 10 {
            tracing::warn!(
                count = phases.len(),
                "Large phase count; phase lookup is a linear scan"
            );
        }

        let mut expected_start = Duration::ZERO;
        for phase in &phases {
            if phase.name.trim().is_empty() {
                return Err(PlanError::InvalidPhases(
                    "phase names cannot be empty".to_string(),
                ));
            }
            if phase.start_offset != expected_start {
                return Err(PlanError::InvalidPhases(format!(
                    "phase '{}' starts at {:?}, expected {:?}",
                    phase.name, phase.start_offset, expected_start
                )));
            }
            if phase.end_offset <= phase.start_offset {
                return Err(PlanError::InvalidPhases(format!(
                    "phase '{}' ends before it starts",
                    phase.name
                )));
            }
            expected_start = phase.end_offset;
        }

        Ok(Self { phases })
    }

    /// One phase covering any run length
    pub fn single(total: Duration) -> Self {
        Self {
            phases: vec![PhaseDefinition::new(
                DEFAULT_PHASE,
                Duration::ZERO,
                total.max(Duration::from_millis(1)),
            )],
        }
    }

    /// Active phase at `elapsed_ms`. Past the last end offset the last phase
    /// stays active, so this never fails.
    pub fn current_phase(&self, elapsed_ms: u64) -> &PhaseDefinition {
        self.phases
            .iter()
            .find(|p| p.contains(elapsed_ms))
            .unwrap_or_else(|| &self.phases[self.phases.len() - 1])
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    /// End offset of the last phase
    pub fn planned_duration(&self) -> Duration {
        self.phases[self.phases.len() - 1].end_offset
    }
}
