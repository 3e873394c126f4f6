//! Run orchestration
//!
//! A run goes through pre-flight, scheduling, draining and reporting. The
//! schedule stops when every executor's shape ends, when `max_duration`
//! elapses, when the abort policy trips or when the caller interrupts,
//! whichever comes first.

use crate::context::RunContext;
use crate::plan::TestPlan;
use crate::report::{RunReport, StopReason};
use crate::scheduler::schedule;
use chrono::Utc;
use loadrig_core::{evaluate_all, MetricsSink};
use loadrig_http::SessionClient;
use loadrig_resilience::{AbortPolicyBuilder, DrainCoordinator, DrainOutcome};
use std::future::{pending, Future};
use std::sync::Arc;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

/// Runs one compiled plan against a session client
pub struct Orchestrator {
    plan: Arc<TestPlan>,
    client: Arc<dyn SessionClient>,
}

impl Orchestrator {
    pub fn new(plan: TestPlan, client: Arc<dyn SessionClient>) -> Self {
        Self {
            plan: Arc::new(plan),
            client,
        }
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// One login and logout with the first credential. A failure is only
    /// logged; nothing is recorded.
    pub async fn preflight(&self) -> bool {
        let credentials = self.plan.credentials.first();
        info!(user = %credentials.username, "Pre-flight connectivity check");

        let mut session = match self.client.login(credentials).await {
            Ok((session, _)) => session,
            Err(e) => {
                warn!(user = %credentials.username, error = %e, "Pre-flight login failed");
                return false;
            }
        };
        if let Err(e) = self.client.logout(&mut session).await {
            warn!(user = %credentials.username, error = %e, "Pre-flight logout failed");
            return false;
        }
        debug!("Pre-flight check passed");
        true
    }

    /// Run the plan to completion and build the report
    pub async fn run(&self) -> RunReport {
        self.run_until(pending()).await
    }

    /// Like [`run`](Self::run), but `interrupt` resolving stops the
    /// schedule early; in-flight iterations still drain
    pub async fn run_until<F>(&self, interrupt: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let plan = &self.plan;
        if plan.preflight {
            self.preflight().await;
        }

        let sink = if plan.record_samples {
            MetricsSink::with_sample_log()
        } else {
            MetricsSink::new()
        };
        let abort = AbortPolicyBuilder::new()
            .window(plan.abort.thresholds.window)
            .error_threshold(plan.abort.thresholds.error_threshold)
            .enabled(plan.abort.enabled)
            .build();
        let drain = DrainCoordinator::new();

        let started_at = Utc::now();
        let ctx = Arc::new(RunContext::new(
            Arc::clone(plan),
            Arc::clone(&self.client),
            sink,
            abort,
            drain,
        ));
        info!(
            plan = %plan.name,
            executors = plan.executors.len(),
            planned = ?plan.planned_duration(),
            "Run started"
        );

        let mut aborted = ctx.abort.subscribe();
        let deadline = plan.max_duration.map(|max| ctx.origin() + max);
        let mut scheduler = tokio::spawn(schedule(Arc::clone(&ctx)));

        let mut finished = None;
        let stop_reason = tokio::select! {
            result = &mut scheduler => {
                finished = Some(result);
                StopReason::Completed
            }
            _ = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending().await,
                }
            } => {
                info!(elapsed = ?ctx.elapsed(), "Maximum duration reached");
                StopReason::MaxDuration
            }
            _ = aborted.wait_for(Option::is_some) => StopReason::Aborted,
            _ = interrupt => {
                info!(elapsed = ?ctx.elapsed(), "Run interrupted");
                StopReason::Interrupted
            }
        };

        ctx.drain.begin_drain();
        let result = match finished {
            Some(result) => result,
            None => scheduler.await,
        };
        let executors = match result {
            Ok(executors) => executors,
            Err(e) => {
                warn!(error = %e, "Scheduler task failed");
                Vec::new()
            }
        };

        if let DrainOutcome::Cancelled { remaining } = ctx.drain.drain(plan.grace_period).await {
            debug!(remaining, "Cancelled iterations after grace period");
        }
        for mut tasks in executors {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Virtual user task failed");
                }
            }
        }

        let duration_ms = ctx.elapsed_ms();
        let summary = ctx.sink.report();
        let thresholds = evaluate_all(&plan.thresholds, &summary);

        let mut report = RunReport::new(
            &plan.name,
            started_at,
            duration_ms,
            stop_reason,
            ctx.abort.record(),
            ctx.iteration_counts(),
            summary,
            thresholds,
        );
        report.samples = ctx.sink.samples();
        report.vus_peak = ctx.vus_peak();
        report.backpressure_drops = ctx.backpressure_drops();
        report.vus_allocated_peak = match plan.arrival_pool() {
            Some((pre_allocated, max)) => ctx.busy_slots_peak().max(pre_allocated).min(max),
            None => ctx.vus_peak(),
        };

        info!(
            plan = %plan.name,
            stop_reason = %report.stop_reason,
            duration_ms,
            iterations = report.iterations.completed(),
            requests = report.summary.request_samples,
            verdict = ?report.verdict,
            passed = report.passed(),
            "Run finished"
        );
        report
    }
}
