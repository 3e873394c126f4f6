//! Core error types for loadrig

use thiserror::Error;

/// Result type alias for plan construction
pub type Result<T> = std::result::Result<T, PlanError>;

/// Errors raised while building journeys, phases or thresholds from a plan
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("Invalid step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    #[error("Invalid scenario '{scenario}': {message}")]
    InvalidScenario { scenario: String, message: String },

    #[error("Unknown placeholder '{{{placeholder}}}' in {location}")]
    UnknownPlaceholder {
        placeholder: String,
        location: String,
    },

    #[error("Invalid phase layout: {0}")]
    InvalidPhases(String),

    #[error("Invalid threshold expression '{expression}': {message}")]
    InvalidThreshold { expression: String, message: String },

    #[error("Empty pool: {0}")]
    EmptyPool(String),

    #[error("{0}")]
    Other(String),
}
