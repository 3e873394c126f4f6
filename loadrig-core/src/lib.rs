//! Core domain model for loadrig
//!
//! Journeys, scenarios, phases, metrics and thresholds. This crate does no
//! network I/O; the HTTP side lives in `loadrig-http` and the scheduling in
//! `loadrig-execution`.

pub mod error;
pub mod journey;
pub mod metrics;
pub mod phase;
pub mod pool;
pub mod template;
pub mod threshold;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{PlanError, Result};
pub use journey::{JourneyStep, Scenario, ScenarioSet, ThinkTime, DEFAULT_STEP_TIMEOUT};
pub use metrics::{
    DistributionStats, MetricError, MetricKind, MetricSample, MetricStats, MetricSummary,
    MetricValue, MetricsSink, Summary,
};
pub use phase::{PhaseClock, PhaseDefinition, ThresholdOverrides, DEFAULT_PHASE};
pub use pool::{CredentialPool, Credentials, DataPools};
pub use template::{BodyTemplate, Template};
pub use threshold::{evaluate_all, Aggregate, Comparison, Threshold, ThresholdExpr, ThresholdResult};
pub use types::{HttpMethod, Outcome, OutcomeClass, ParseError};
