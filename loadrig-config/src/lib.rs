//! Domain-driven configuration management for loadrig
//!
//! Configuration is split by functional domain (http, logging, plan), with
//! validation, defaults, environment variable overrides and built-in presets.

pub mod error;
pub mod loader;
pub mod presets;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, ConfigLoader};
pub use presets::Preset;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    http::{AuthConfig, HttpConfig},
    logging::{LogFormat, LogLevel, LogTarget, LoggingConfig, Rotation},
    plan::{
        AbortConfig, CredentialConfig, ExecutorConfig, LoadShapeConfig, PhaseConfig, PlanConfig,
        RampMode, ScenarioConfig, StageConfig, StepConfig, ThinkTimeConfig,
    },
    LoadrigConfig,
};
