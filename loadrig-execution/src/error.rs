//! Error types for run execution

use loadrig_config::ConfigError;
use loadrig_core::{MetricError, PlanError};
use loadrig_http::RequestError;
use thiserror::Error;

/// Errors that prevent a run from starting or finishing
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricError),

    #[error("HTTP client error: {0}")]
    Client(#[from] RequestError),

    #[error("Scheduler task failed: {0}")]
    Scheduler(String),

    #[error("Report serialization failed: {0}")]
    Report(#[from] serde_json::Error),
}
