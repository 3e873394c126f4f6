//! Run-level resilience for loadrig
//!
//! Early termination on sustained critical failures and graceful draining of
//! in-flight iterations when a run stops.

pub mod abort;
pub mod drain;

// Re-export commonly used types
pub use abort::{AbortPolicy, AbortPolicyBuilder, AbortRecord, AbortState, AbortThresholds, AbortWindow};
pub use drain::{cancelled, DrainCoordinator, DrainOutcome, InFlightGuard, StopSignal};
