//! Loadrig execution engine
//!
//! Compiles a plan into a [`TestPlan`], drives virtual users through it per
//! the load shape of each executor and folds everything recorded into a [`RunReport`].

pub mod context;
pub mod error;
pub mod iteration;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod shape;

// Re-export main types
pub use context::{ActiveVu, BusySlot, RunContext};
pub use error::ExecutionError;
pub use iteration::{execute, execute_from, run_tracked, Iteration, IterationOutcome};
pub use orchestrator::Orchestrator;
pub use plan::{AbortSettings, Executor, TestPlan};
pub use report::{IterationCounts, RunReport, StopReason, Verdict};
pub use scheduler::schedule;
pub use shape::{ArrivalRate, Curve, LoadShape, RampMode, Stage};
