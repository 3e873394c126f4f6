//! Compile a declarative plan into the runtime model

use crate::error::ExecutionError;
use crate::shape::LoadShape;
use loadrig_config::{ExecutorConfig, PlanConfig, ScenarioConfig, StepConfig, ThinkTimeConfig};
use loadrig_core::{
    CredentialPool, Credentials, DataPools, HttpMethod, JourneyStep, PhaseClock, PhaseDefinition,
    PlanError, Scenario, ScenarioSet, ThinkTime, Threshold, ThresholdOverrides,
};
use loadrig_resilience::AbortThresholds;
use std::time::Duration;
use tracing::debug;

/// Abort policy settings of a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbortSettings {
    pub enabled: bool,
    pub thresholds: AbortThresholds,
}

/// One load generator: a shape over a set of scenarios, offset from the
/// run start
#[derive(Debug, Clone)]
pub struct Executor {
    pub name: String,
    pub shape: LoadShape,
    pub start_delay: Duration,
    pub scenarios: ScenarioSet,
}

impl Executor {
    fn compile(config: &ExecutorConfig, all: &ScenarioSet) -> Result<Self, PlanError> {
        let scenarios = all.subset(&config.scenarios).map_err(|e| {
            PlanError::Other(format!("executor '{}': {}", config.name, e))
        })?;
        Ok(Self {
            name: config.name.clone(),
            shape: LoadShape::from(&config.load),
            start_delay: config.start_delay,
            scenarios,
        })
    }

    /// Offset at which the schedule of this executor ends
    pub fn end(&self) -> Duration {
        self.start_delay + self.shape.duration()
    }
}

/// A validated plan, ready to run
#[derive(Debug, Clone)]
pub struct TestPlan {
    pub name: String,
    pub description: Option<String>,
    pub executors: Vec<Executor>,
    pub clock: PhaseClock,
    pub scenarios: ScenarioSet,
    pub credentials: CredentialPool,
    pub pools: DataPools,
    pub thresholds: Vec<Threshold>,
    pub abort: AbortSettings,
    pub max_duration: Option<Duration>,
    pub grace_period: Duration,
    pub preflight: bool,
    pub record_samples: bool,
}

impl TestPlan {
    /// Build the runtime model; `default_timeout` applies to steps without
    /// their own timeout
    pub fn compile(config: &PlanConfig, default_timeout: Duration) -> Result<Self, ExecutionError> {
        let pools = DataPools::new(config.pools.clone())?;
        let credentials = CredentialPool::new(
            config
                .credentials
                .iter()
                .map(|c| Credentials::new(&c.username, &c.password))
                .collect(),
        )?;

        let scenarios = config
            .scenarios
            .iter()
            .map(|s| compile_scenario(s, default_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        let scenarios = ScenarioSet::new(scenarios, &pools)?;

        if config.executors.is_empty() {
            return Err(PlanError::Other("a plan needs at least one executor".to_string()).into());
        }
        let executors = config
            .executors
            .iter()
            .map(|e| Executor::compile(e, &scenarios))
            .collect::<Result<Vec<_>, _>>()?;
        let planned = executors.iter().map(Executor::end).max().unwrap_or_default();
        let clock = if config.phases.is_empty() {
            PhaseClock::single(planned)
        } else {
            PhaseClock::new(
                config
                    .phases
                    .iter()
                    .map(|p| {
                        PhaseDefinition::new(&p.name, p.start, p.end).with_overrides(
                            ThresholdOverrides {
                                error_threshold: p.error_threshold,
                                window: p.window,
                            },
                        )
                    })
                    .collect(),
            )?
        };

        let mut thresholds = Vec::new();
        for (metric, expressions) in &config.thresholds {
            for expression in expressions {
                thresholds.push(Threshold::parse(metric, expression)?);
            }
        }

        debug!(
            plan = %config.name,
            executors = executors.len(),
            scenarios = scenarios.len(),
            thresholds = thresholds.len(),
            "Compiled plan"
        );

        Ok(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            executors,
            clock,
            scenarios,
            credentials,
            pools,
            thresholds,
            abort: AbortSettings {
                enabled: config.abort.enabled,
                thresholds: AbortThresholds {
                    window: config.abort.window,
                    error_threshold: config.abort.error_threshold,
                },
            },
            max_duration: config.max_duration,
            grace_period: config.grace_period,
            preflight: config.preflight,
            record_samples: config.record_samples,
        })
    }

    /// End of the last executor's schedule, capped by `max_duration`
    pub fn planned_duration(&self) -> Duration {
        let planned = self.executors.iter().map(Executor::end).max().unwrap_or_default();
        match self.max_duration {
            Some(max) => planned.min(max),
            None => planned,
        }
    }

    /// Summed `(pre_allocated, max)` slots when every executor is
    /// arrival-rate driven
    pub fn arrival_pool(&self) -> Option<(u32, u32)> {
        self.executors
            .iter()
            .try_fold((0u32, 0u32), |(pre, max), executor| match &executor.shape {
                LoadShape::ArrivalRate(arrival) => Some((
                    pre.saturating_add(arrival.pre_allocated_vus),
                    max.saturating_add(arrival.max_vus),
                )),
                _ => None,
            })
    }
}

fn think_time(config: Option<&ThinkTimeConfig>) -> ThinkTime {
    match config {
        None => ThinkTime::None,
        Some(ThinkTimeConfig { min, max: None }) => ThinkTime::Fixed(*min),
        Some(ThinkTimeConfig { min, max: Some(max) }) => ThinkTime::Uniform {
            min: *min,
            max: *max,
        },
    }
}

fn compile_scenario(config: &ScenarioConfig, default_timeout: Duration) -> Result<Scenario, PlanError> {
    let steps = config
        .steps
        .iter()
        .map(|s| compile_step(s, default_timeout))
        .collect::<Result<Vec<_>, _>>()?;

    let mut scenario = Scenario::new(&config.name, steps)
        .with_think_time(think_time(config.think_time.as_ref()))
        .with_pacing(think_time(config.pacing.as_ref()));
    if let Some(weight) = config.weight {
        scenario = scenario.with_weight(weight);
    }
    Ok(scenario)
}

fn compile_step(config: &StepConfig, default_timeout: Duration) -> Result<JourneyStep, PlanError> {
    let method: HttpMethod = config.method.parse().map_err(|e| PlanError::InvalidStep {
        step: config.name.clone(),
        message: format!("{}", e),
    })?;

    let mut step = JourneyStep::new(&config.name, method, &config.path)
        .accept(config.accept.iter().copied())
        .with_timeout(config.timeout.unwrap_or(default_timeout));
    if let Some(ref body) = config.body {
        step = step.with_body(body.clone());
    }
    if let Some(ref key) = config.metric_key {
        step = step.with_metric_key(key);
    }
    if config.critical {
        step = step.critical();
    }
    Ok(step)
}
