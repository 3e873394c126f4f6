//! Journey steps and scenarios
//!
//! A [`JourneyStep`] is one named HTTP operation with its full set of
//! acceptable statuses. A [`Scenario`] is the ordered list of steps one
//! virtual user walks through between login and logout. Both are immutable
//! once built and are shared read-only by every virtual user.

use crate::error::{PlanError, Result};
use crate::pool::DataPools;
use crate::template::{BodyTemplate, Template, DISPLAY_NAME, USERNAME};
use crate::types::HttpMethod;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::time::Duration;

/// Default per-step timeout, matching the 30s used by the capacity scripts
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// A single named HTTP operation
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyStep {
    pub name: String,
    pub method: HttpMethod,
    pub path: Template,
    pub body: Option<BodyTemplate>,
    pub acceptable_statuses: BTreeSet<u16>,
    pub timeout: Duration,
    pub metric_key: String,
    /// A failed critical step ends the iteration early
    pub critical: bool,
}

impl JourneyStep {
    /// New step accepting only 200; the metric key defaults to the name
    pub fn new(name: impl Into<String>, method: HttpMethod, path: &str) -> Self {
        let name = name.into();
        Self {
            metric_key: name.clone(),
            name,
            method,
            path: Template::parse(path),
            body: None,
            acceptable_statuses: [200].into_iter().collect(),
            timeout: DEFAULT_STEP_TIMEOUT,
            critical: false,
        }
    }

    pub fn get(name: impl Into<String>, path: &str) -> Self {
        Self::new(name, HttpMethod::Get, path)
    }

    pub fn post(name: impl Into<String>, path: &str, body: JsonValue) -> Self {
        Self::new(name, HttpMethod::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(BodyTemplate::new(body));
        self
    }

    pub fn accept(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.acceptable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metric_key(mut self, key: impl Into<String>) -> Self {
        self.metric_key = key.into();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.acceptable_statuses.contains(&status)
    }

    /// Check the definition and that every placeholder resolves
    pub fn validate(&self, pools: &DataPools) -> Result<()> {
        let invalid = |message: String| PlanError::InvalidStep {
            step: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if self.metric_key.trim().is_empty() {
            return Err(invalid("metric key cannot be empty".to_string()));
        }
        if self.acceptable_statuses.is_empty() {
            return Err(invalid(
                "acceptable statuses must be listed explicitly".to_string(),
            ));
        }
        if let Some(status) = self
            .acceptable_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(invalid(format!("{} is not an HTTP status", status)));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be greater than 0".to_string()));
        }
        if !self.path.as_str().starts_with('/') {
            return Err(invalid(format!(
                "path '{}' must start with '/'",
                self.path.as_str()
            )));
        }

        let known = |name: &str| name == USERNAME || name == DISPLAY_NAME || pools.contains(name);
        let location = format!("step '{}'", self.name);
        self.path.check(&known, &location)?;
        if let Some(body) = &self.body {
            body.check(&known, &location)?;
        }
        Ok(())
    }
}

/// Pause distribution between steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample(&self, rng: &mut fastrand::Rng) -> Duration {
        match *self {
            ThinkTime::None => Duration::ZERO,
            ThinkTime::Fixed(d) => d,
            ThinkTime::Uniform { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;
                if max_ms <= min_ms {
                    min
                } else {
                    Duration::from_millis(rng.u64(min_ms..=max_ms))
                }
            }
        }
    }
}

/// One simulated user journey: login, steps in order, logout
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub weight: Option<f64>,
    pub steps: Vec<JourneyStep>,
    /// Applied after login and before every step
    pub think_time: ThinkTime,
    /// Applied once after logout, before the virtual user's next iteration
    pub pacing: ThinkTime,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<JourneyStep>) -> Self {
        Self {
            name: name.into(),
            weight: None,
            steps,
            think_time: ThinkTime::None,
            pacing: ThinkTime::None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_pacing(mut self, pacing: ThinkTime) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn validate(&self, pools: &DataPools) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PlanError::InvalidScenario {
                scenario: self.name.clone(),
                message: "name cannot be empty".to_string(),
            });
        }
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight < 0.0 {
                return Err(PlanError::InvalidScenario {
                    scenario: self.name.clone(),
                    message: format!("weight must be a non-negative number, got {}", weight),
                });
            }
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            step.validate(pools)?;
            if !seen.insert(step.name.as_str()) {
                return Err(PlanError::InvalidScenario {
                    scenario: self.name.clone(),
                    message: format!("duplicate step name '{}'", step.name),
                });
            }
        }
        Ok(())
    }
}

/// The scenario variants of a plan with their selection weights
#[derive(Debug, Clone)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
    weighted: bool,
    total_weight: f64,
}

impl ScenarioSet {
    /// Build and validate. Without any weight, selection is uniform; once one
    /// scenario has a weight, unweighted ones count as 0.
    pub fn new(scenarios: Vec<Scenario>, pools: &DataPools) -> Result<Self> {
        if scenarios.is_empty() {
            return Err(PlanError::Other(
                "a plan needs at least one scenario".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for scenario in &scenarios {
            scenario.validate(pools)?;
            if !names.insert(scenario.name.as_str()) {
                return Err(PlanError::InvalidScenario {
                    scenario: scenario.name.clone(),
                    message: "duplicate scenario name".to_string(),
                });
            }
        }

        Self::weighed(scenarios)
    }

    fn weighed(scenarios: Vec<Scenario>) -> Result<Self> {
        let weighted = scenarios.iter().any(|s| s.weight.is_some());
        let total_weight: f64 = scenarios.iter().filter_map(|s| s.weight).sum();
        if weighted && total_weight <= 0.0 {
            return Err(PlanError::Other(
                "scenario weights must sum to more than 0".to_string(),
            ));
        }

        Ok(Self {
            scenarios,
            weighted,
            total_weight,
        })
    }

    /// The named scenarios only, keeping their weights; no names keeps all
    pub fn subset(&self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        let mut picked = Vec::with_capacity(names.len());
        for name in names {
            let scenario = self
                .scenarios
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| PlanError::Other(format!("unknown scenario '{}'", name)))?;
            if !picked.iter().any(|s: &Scenario| &s.name == name) {
                picked.push(scenario.clone());
            }
        }
        Self::weighed(picked)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn first(&self) -> &Scenario {
        &self.scenarios[0]
    }

    /// Pick the scenario for one iteration
    pub fn select(&self, rng: &mut fastrand::Rng) -> &Scenario {
        if !self.weighted {
            return &self.scenarios[rng.usize(..self.scenarios.len())];
        }

        let target = rng.f64() * self.total_weight;
        let mut cumulative = 0.0;
        for scenario in &self.scenarios {
            let weight = scenario.weight.unwrap_or(0.0);
            if weight <= 0.0 {
                continue;
            }
            cumulative += weight;
            if target < cumulative {
                return scenario;
            }
        }

        // Float rounding at the top end; fall back to the last weighted one
        self.scenarios
            .iter()
            .rev()
            .find(|s| s.weight.unwrap_or(0.0) > 0.0)
            .unwrap_or(&self.scenarios[0])
    }
}
