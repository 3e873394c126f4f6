//! Domain-specific configuration modules

pub mod http;
pub mod logging;
pub mod plan;
pub mod utils;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main loadrig configuration combining all domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoadrigConfig {
    /// HTTP client and target configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Test plan (required for `run`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<plan::PlanConfig>,
}

impl LoadrigConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.http.validate()?;
        self.logging.validate()?;

        if let Some(ref plan) = self.plan {
            plan.validate()?;
        }

        Ok(())
    }

    /// The plan section, or an error when the file has none
    pub fn plan(&self) -> ConfigResult<&plan::PlanConfig> {
        self.plan.as_ref().ok_or(ConfigError::MissingPlan)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
