//! One virtual-user iteration: login, steps, logout

use crate::context::RunContext;
use loadrig_core::metrics::{ITERATIONS, ITERATION_DURATION, LOGIN, LOGIN_SUCCESS_RATE, LOGOUT};
use loadrig_core::template::{DISPLAY_NAME, USERNAME};
use loadrig_core::{MetricSample, ScenarioSet};
use loadrig_http::PreparedRequest;
use loadrig_resilience::cancelled;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How an iteration ended. A finished iteration is exactly one of
/// `LoginFailed` or `ScenarioExecuted`; `Cancelled` ones never finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationOutcome {
    LoginFailed,
    ScenarioExecuted {
        failed_steps: usize,
        /// Critical step that stopped the scenario early
        halted_at: Option<String>,
    },
    Cancelled,
}

/// Outcome plus the pause the scenario asks for before the next iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub outcome: IterationOutcome,
    pub pacing: Duration,
}

impl Iteration {
    fn cancelled() -> Self {
        Self {
            outcome: IterationOutcome::Cancelled,
            pacing: Duration::ZERO,
        }
    }
}

/// Run one iteration over `scenarios` as tracked in-flight work. It gives
/// up when the run is cancelled or when `interrupt` resolves.
pub async fn run_tracked<F>(
    ctx: &RunContext,
    scenarios: &ScenarioSet,
    rng: &mut fastrand::Rng,
    interrupt: F,
) -> Iteration
where
    F: Future<Output = ()>,
{
    let _in_flight = ctx.drain.track();
    let mut stop = ctx.drain.subscribe();
    ctx.iteration_started();

    let iteration = tokio::select! {
        iteration = execute_from(ctx, scenarios, rng) => iteration,
        _ = cancelled(&mut stop) => Iteration::cancelled(),
        _ = interrupt => Iteration::cancelled(),
    };

    match &iteration.outcome {
        IterationOutcome::LoginFailed => ctx.login_failed(),
        IterationOutcome::ScenarioExecuted { halted_at, .. } => {
            ctx.scenario_executed(halted_at.is_some())
        }
        IterationOutcome::Cancelled => {
            debug!("Iteration cancelled");
            ctx.iteration_cancelled();
        }
    }

    iteration
}

/// login -> (think, step)* -> logout over any of the plan's scenarios
pub async fn execute(ctx: &RunContext, rng: &mut fastrand::Rng) -> Iteration {
    execute_from(ctx, &ctx.plan.scenarios, rng).await
}

/// login -> (think, step)* -> logout, recording every call
pub async fn execute_from(
    ctx: &RunContext,
    scenarios: &ScenarioSet,
    rng: &mut fastrand::Rng,
) -> Iteration {
    let plan = &ctx.plan;
    let credentials = plan.credentials.pick(rng).clone();
    let scenario = scenarios.select(rng);
    let mut vars = plan.pools.draw(rng);
    vars.insert(USERNAME.to_string(), credentials.username.clone());
    let pacing = scenario.pacing.sample(rng);
    let iteration_start = Instant::now();

    let login_at = ctx.elapsed_ms();
    let started = Instant::now();
    let login = ctx.client.login(&credentials).await;
    let login_phase = ctx.phase_at(login_at).name.clone();

    let mut session = match login {
        Ok((session, timing)) => {
            ctx.record_request(LOGIN, login_at, timing.latency, Some(timing.waiting), timing.outcome);
            ctx.record(MetricSample::rate(LOGIN_SUCCESS_RATE, login_phase.as_str(), true, login_at));
            session
        }
        Err(e) => {
            ctx.record_request(LOGIN, login_at, started.elapsed(), None, e.outcome());
            ctx.record(MetricSample::rate(LOGIN_SUCCESS_RATE, login_phase.as_str(), false, login_at));
            warn!(user = %credentials.username, phase = %login_phase, error = %e, "Login failed, skipping iteration");
            return Iteration {
                outcome: IterationOutcome::LoginFailed,
                pacing,
            };
        }
    };
    vars.insert(DISPLAY_NAME.to_string(), session.display_name().to_string());

    let mut failed_steps = 0;
    let mut halted_at = None;
    for step in &scenario.steps {
        let think = scenario.think_time.sample(rng);
        if !think.is_zero() {
            tokio::time::sleep(think).await;
        }

        let request = PreparedRequest::from_step(step, &vars);
        let at = ctx.elapsed_ms();
        let started = Instant::now();
        let (outcome, latency, waiting) = match ctx.client.authenticated_request(&session, &request).await {
            Ok(result) => (result.outcome, result.latency, Some(result.waiting)),
            Err(e) => (e.outcome(), started.elapsed(), None),
        };
        ctx.record_request(&step.metric_key, at, latency, waiting, outcome);

        if outcome.is_failure() {
            failed_steps += 1;
            debug!(step = %step.name, path = %request.path, outcome = %outcome, "Step failed");
            if step.critical {
                warn!(step = %step.name, outcome = %outcome, "Critical step failed, ending scenario early");
                halted_at = Some(step.name.clone());
                break;
            }
        }
    }

    let logout_at = ctx.elapsed_ms();
    let started = Instant::now();
    match ctx.client.logout(&mut session).await {
        Ok(result) => {
            ctx.record_request(LOGOUT, logout_at, result.latency, Some(result.waiting), result.outcome)
        }
        Err(e) => {
            ctx.record_request(LOGOUT, logout_at, started.elapsed(), None, e.outcome());
            warn!(user = %credentials.username, error = %e, "Logout failed");
        }
    }

    let finished_at = ctx.elapsed_ms();
    let phase = ctx.phase_at(finished_at).name.clone();
    ctx.record(MetricSample::counter(ITERATIONS, phase.as_str(), 1, finished_at));
    ctx.record(MetricSample::distribution(
        ITERATION_DURATION,
        phase,
        iteration_start.elapsed().as_secs_f64() * 1000.0,
        finished_at,
    ));

    Iteration {
        outcome: IterationOutcome::ScenarioExecuted {
            failed_steps,
            halted_at,
        },
        pacing,
    }
}
