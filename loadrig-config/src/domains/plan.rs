//! Declarative test plan
//!
//! A plan names its executors, the scenarios with their steps, the phases,
//! abort thresholds, metric thresholds and the credential/data pools. Every
//! executor drives its own load shape over a subset of the scenarios; all of
//! them record into one sink and answer to one abort policy. This
//! module only checks structure; placeholders, phase layout and threshold
//! expressions are checked when the plan is compiled into a runnable form.

use crate::error::ConfigResult;
use crate::validation::{
    validate_duration, validate_enum_choice, validate_positive, validate_required_string,
    Validatable,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// A complete test plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Load generators, started together; each waits its own `start_delay`
    pub executors: Vec<ExecutorConfig>,

    /// Contiguous phases covering the run; empty means one `default` phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseConfig>,

    #[serde(default)]
    pub abort: AbortConfig,

    /// Metric key to threshold expressions, e.g. `http_req_duration: ["p(95)<2000"]`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, Vec<String>>,

    pub credentials: Vec<CredentialConfig>,

    /// Named value pools; each iteration draws one value per pool
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pools: BTreeMap<String, Vec<String>>,

    pub scenarios: Vec<ScenarioConfig>,

    /// Hard cap on the run, whatever the load shape says
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_duration: Option<Duration>,

    /// How long in-flight iterations may run on after the schedule stops
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,

    /// Log in and out once before the run as a connectivity check
    #[serde(default = "crate::domains::utils::default_true")]
    pub preflight: bool,

    /// Keep every metric sample in memory for export
    #[serde(default = "crate::domains::utils::default_false")]
    pub record_samples: bool,
}

/// One named load generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub name: String,

    pub load: LoadShapeConfig,

    /// Offset from the run start before this executor begins
    #[serde(with = "humantime_serde", default)]
    pub start_delay: Duration,

    /// Scenario names this executor picks from; empty means all of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<String>,
}

impl ExecutorConfig {
    pub fn new(name: &str, load: LoadShapeConfig) -> Self {
        Self {
            name: name.to_string(),
            load,
            start_delay: Duration::ZERO,
            scenarios: Vec::new(),
        }
    }

    pub fn starting_after(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_scenarios(mut self, names: &[&str]) -> Self {
        self.scenarios = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Offset at which this executor's schedule ends
    pub fn planned_end(&self) -> Duration {
        self.start_delay + self.load.planned_duration()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub username: String,
    pub password: String,
}

impl CredentialConfig {
    /// Credential whose password equals the username
    pub fn same(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: username.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Pause after login and before every step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think_time: Option<ThinkTimeConfig>,

    /// Pause after logout before the next iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<ThinkTimeConfig>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Uniform pause in `[min, max]`; a fixed pause when `max` is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkTimeConfig {
    #[serde(with = "humantime_serde")]
    pub min: Duration,

    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<Duration>,
}

impl ThinkTimeConfig {
    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: None }
    }

    pub fn uniform(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,

    /// Every status this step treats as acceptable, including expected 4xx
    #[serde(default = "default_accept")]
    pub accept: Vec<u16>,

    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_key: Option<String>,

    /// A failure of this step ends the iteration
    #[serde(default = "crate::domains::utils::default_false")]
    pub critical: bool,
}

impl StepConfig {
    pub fn get(name: &str, path: &str, accept: &[u16]) -> Self {
        Self {
            name: name.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            body: None,
            accept: accept.to_vec(),
            timeout: None,
            metric_key: None,
            critical: false,
        }
    }

    pub fn post(name: &str, path: &str, body: JsonValue, accept: &[u16]) -> Self {
        Self {
            method: "POST".to_string(),
            body: Some(body),
            ..Self::get(name, path, accept)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    /// Interpolate between stage targets
    #[default]
    Linear,
    /// Jump to each stage target at the stage start
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: u32,
}

impl StageConfig {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// How iterations are scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadShapeConfig {
    /// A fixed number of VUs looping back to back
    ConstantVus {
        vus: u32,
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// VU count following stage targets
    RampingVus {
        #[serde(default)]
        start_vus: u32,
        stages: Vec<StageConfig>,
        #[serde(default)]
        ramp: RampMode,
        #[serde(with = "humantime_serde", default = "default_graceful_ramp_down")]
        graceful_ramp_down: Duration,
    },
    /// Iteration starts per `time_unit` following stage targets
    RampingArrivalRate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_rate: Option<u32>,
        #[serde(with = "humantime_serde", default = "default_time_unit")]
        time_unit: Duration,
        pre_allocated_vus: u32,
        max_vus: u32,
        stages: Vec<StageConfig>,
        #[serde(default)]
        ramp: RampMode,
    },
    /// A fixed number of iteration starts per `time_unit`
    ConstantArrivalRate {
        rate: u32,
        #[serde(with = "humantime_serde", default = "default_time_unit")]
        time_unit: Duration,
        #[serde(with = "humantime_serde")]
        duration: Duration,
        pre_allocated_vus: u32,
        max_vus: u32,
    },
    /// Every VU runs exactly `iterations` iterations
    PerVuIterations {
        vus: u32,
        iterations: u32,
        #[serde(with = "humantime_serde", default = "default_max_iteration_duration")]
        max_duration: Duration,
    },
    /// `iterations` iterations in total, taken by whichever VU is free
    SharedIterations {
        vus: u32,
        iterations: u32,
        #[serde(with = "humantime_serde", default = "default_max_iteration_duration")]
        max_duration: Duration,
    },
}

impl LoadShapeConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadShapeConfig::ConstantVus { .. } => "constant_vus",
            LoadShapeConfig::RampingVus { .. } => "ramping_vus",
            LoadShapeConfig::RampingArrivalRate { .. } => "ramping_arrival_rate",
            LoadShapeConfig::ConstantArrivalRate { .. } => "constant_arrival_rate",
            LoadShapeConfig::PerVuIterations { .. } => "per_vu_iterations",
            LoadShapeConfig::SharedIterations { .. } => "shared_iterations",
        }
    }

    /// Scheduled length, excluding start delay and drain. Iteration-count
    /// shapes report their `max_duration`.
    pub fn planned_duration(&self) -> Duration {
        match self {
            LoadShapeConfig::ConstantVus { duration, .. }
            | LoadShapeConfig::ConstantArrivalRate { duration, .. } => *duration,
            LoadShapeConfig::PerVuIterations { max_duration, .. }
            | LoadShapeConfig::SharedIterations { max_duration, .. } => *max_duration,
            LoadShapeConfig::RampingVus { stages, .. }
            | LoadShapeConfig::RampingArrivalRate { stages, .. } => {
                stages.iter().map(|s| s.duration).sum()
            }
        }
    }
}

impl Validatable for LoadShapeConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        match self {
            LoadShapeConfig::ConstantVus { vus, duration } => {
                validate_positive(*vus, "vus", domain)?;
                validate_duration(*duration, "duration", domain)?;
            }
            LoadShapeConfig::RampingVus { stages, .. } => {
                validate_stages(stages, domain)?;
            }
            LoadShapeConfig::RampingArrivalRate {
                time_unit,
                pre_allocated_vus,
                max_vus,
                stages,
                ..
            } => {
                validate_duration(*time_unit, "time_unit", domain)?;
                validate_pool(*pre_allocated_vus, *max_vus, domain)?;
                validate_stages(stages, domain)?;
            }
            LoadShapeConfig::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                validate_positive(*rate, "rate", domain)?;
                validate_duration(*time_unit, "time_unit", domain)?;
                validate_duration(*duration, "duration", domain)?;
                validate_pool(*pre_allocated_vus, *max_vus, domain)?;
            }
            LoadShapeConfig::PerVuIterations {
                vus,
                iterations,
                max_duration,
            } => {
                validate_positive(*vus, "vus", domain)?;
                validate_positive(*iterations, "iterations", domain)?;
                validate_duration(*max_duration, "max_duration", domain)?;
            }
            LoadShapeConfig::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => {
                validate_positive(*vus, "vus", domain)?;
                validate_positive(*iterations, "iterations", domain)?;
                validate_duration(*max_duration, "max_duration", domain)?;
                if iterations < vus {
                    return Err(self.validation_error(format!(
                        "iterations ({}) cannot be fewer than vus ({})",
                        iterations, vus
                    )));
                }
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "plan.load"
    }
}

fn validate_stages(stages: &[StageConfig], domain: &str) -> ConfigResult<()> {
    if stages.is_empty() {
        return Err(crate::error::ConfigError::DomainError {
            domain: domain.to_string(),
            message: "at least one stage is required".to_string(),
        });
    }
    for (i, stage) in stages.iter().enumerate() {
        validate_duration(stage.duration, &format!("stages[{}].duration", i), domain)?;
    }
    Ok(())
}

fn validate_pool(pre_allocated: u32, max: u32, domain: &str) -> ConfigResult<()> {
    validate_positive(max, "max_vus", domain)?;
    if pre_allocated > max {
        return Err(crate::error::ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "pre_allocated_vus ({}) cannot exceed max_vus ({})",
                pre_allocated, max
            ),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,

    #[serde(with = "humantime_serde")]
    pub start: Duration,

    #[serde(with = "humantime_serde")]
    pub end: Duration,

    /// Abort threshold while this phase is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<u32>,

    /// Abort window while this phase is active
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub window: Option<Duration>,
}

/// Fixed-window abort policy settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortConfig {
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    #[serde(with = "humantime_serde", default = "default_abort_window")]
    pub window: Duration,

    /// Critical failures tolerated per window
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

impl Default for AbortConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_abort_window(),
            error_threshold: default_error_threshold(),
        }
    }
}

impl Validatable for AbortConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.window, "window", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "plan.abort"
    }
}

impl Validatable for StepConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        validate_required_string(&self.name, "name", domain)?;
        validate_enum_choice(&self.method, &HTTP_METHODS, "method", domain)?;
        if !self.path.starts_with('/') {
            return Err(self.validation_error(format!(
                "step '{}' path must start with '/'",
                self.name
            )));
        }
        if self.accept.is_empty() {
            return Err(self.validation_error(format!(
                "step '{}' must list its acceptable statuses",
                self.name
            )));
        }
        if let Some(timeout) = self.timeout {
            validate_duration(timeout, "timeout", domain)?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "plan.step"
    }
}

impl Validatable for ScenarioConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.name, "name", self.domain_name())?;
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight < 0.0 {
                return Err(self.validation_error(format!(
                    "scenario '{}' weight must be a non-negative number",
                    self.name
                )));
            }
        }
        for pause in [&self.think_time, &self.pacing].into_iter().flatten() {
            if matches!(pause.max, Some(max) if max < pause.min) {
                return Err(self.validation_error(format!(
                    "scenario '{}' pause max is below min",
                    self.name
                )));
            }
        }
        for step in &self.steps {
            step.validate()?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "plan.scenario"
    }
}

impl Validatable for PlanConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.name, "name", self.domain_name())?;

        if self.credentials.is_empty() {
            return Err(self.validation_error("at least one credential is required"));
        }
        for credential in &self.credentials {
            validate_required_string(&credential.username, "credentials.username", self.domain_name())?;
        }

        for (name, values) in &self.pools {
            if values.is_empty() {
                return Err(self.validation_error(format!("pool '{}' is empty", name)));
            }
        }

        if self.scenarios.is_empty() {
            return Err(self.validation_error("at least one scenario is required"));
        }
        let mut names = BTreeSet::new();
        for scenario in &self.scenarios {
            scenario.validate()?;
            if !names.insert(scenario.name.as_str()) {
                return Err(self.validation_error(format!(
                    "duplicate scenario name '{}'",
                    scenario.name
                )));
            }
        }

        if self.executors.is_empty() {
            return Err(self.validation_error("at least one executor is required"));
        }
        let mut executors = BTreeSet::new();
        for executor in &self.executors {
            validate_required_string(&executor.name, "executors.name", self.domain_name())?;
            if !executors.insert(executor.name.as_str()) {
                return Err(self.validation_error(format!(
                    "duplicate executor name '{}'",
                    executor.name
                )));
            }
            for scenario in &executor.scenarios {
                if !names.contains(scenario.as_str()) {
                    return Err(self.validation_error(format!(
                        "executor '{}' names unknown scenario '{}'",
                        executor.name, scenario
                    )));
                }
            }
            executor.load.validate()?;
        }
        self.abort.validate()?;

        for phase in &self.phases {
            validate_required_string(&phase.name, "phases.name", self.domain_name())?;
            if phase.end <= phase.start {
                return Err(self.validation_error(format!(
                    "phase '{}' must end after it starts",
                    phase.name
                )));
            }
        }

        if let Some(max) = self.max_duration {
            validate_duration(max, "max_duration", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "plan"
    }
}

// Default value functions
fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_graceful_ramp_down() -> Duration {
    Duration::from_secs(30)
}

fn default_max_iteration_duration() -> Duration {
    Duration::from_secs(600)
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_abort_window() -> Duration {
    Duration::from_secs(5)
}

fn default_error_threshold() -> u32 {
    100
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_accept() -> Vec<u16> {
    vec![200]
}
