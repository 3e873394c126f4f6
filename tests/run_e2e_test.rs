//! Whole runs against the in-process backend, in real time

mod support;

use anyhow::Result;
use loadrig_config::{
    AbortConfig, CredentialConfig, ExecutorConfig, LoadShapeConfig, PhaseConfig, PlanConfig,
    Preset, ScenarioConfig, StepConfig, ThinkTimeConfig,
};
use loadrig_core::metrics::HTTP_REQ_FAILED;
use loadrig_execution::{Orchestrator, StopReason, TestPlan, Verdict};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::StubServer;

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn browse_plan(load: LoadShapeConfig, steps: Vec<StepConfig>) -> PlanConfig {
    PlanConfig {
        name: "browse".to_string(),
        description: None,
        executors: vec![ExecutorConfig::new("main", load)],
        phases: Vec::new(),
        abort: AbortConfig::default(),
        thresholds: BTreeMap::new(),
        credentials: vec![
            CredentialConfig::same("fulano4"),
            CredentialConfig::same("fulano1"),
        ],
        pools: BTreeMap::new(),
        scenarios: vec![ScenarioConfig {
            name: "browse".to_string(),
            weight: None,
            think_time: None,
            pacing: Some(ThinkTimeConfig::fixed(millis(50))),
            steps,
        }],
        max_duration: None,
        grace_period: secs(5),
        preflight: false,
        record_samples: false,
    }
}

fn search() -> StepConfig {
    StepConfig::get("search", "/problems/key/S", &[200, 404])
}

fn details(code: &str) -> StepConfig {
    StepConfig::get(
        "problem_details",
        &format!("/problems/{}/details", code),
        &[200, 404, 422],
    )
}

fn orchestrator(server: &StubServer, config: &PlanConfig) -> Result<Orchestrator> {
    let plan = TestPlan::compile(config, secs(5))?;
    Ok(Orchestrator::new(plan, Arc::new(server.client()?)))
}

#[tokio::test]
async fn test_functional_journey_passes() -> Result<()> {
    let server = StubServer::start().await?;
    let mut config = Preset::Functional.build().plan()?.clone();
    config.executors[0].load = LoadShapeConfig::ConstantVus {
        vus: 2,
        duration: secs(2),
    };
    config.scenarios[0].think_time = None;
    config.scenarios[0].pacing = Some(ThinkTimeConfig::fixed(millis(100)));

    let report = orchestrator(&server, &config)?.run().await;

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert!(report.iterations.scenario_executed > 0);
    assert_eq!(report.iterations.login_failed, 0);
    assert_eq!(report.summary.rate(HTTP_REQ_FAILED), Some(0.0));
    assert_eq!(report.verdict, Verdict::Stable);
    assert!(report.passed(), "{}", report.render_text());

    // Pre-flight opens and closes one more session than the run records
    let backend = &server.backend;
    assert_eq!(
        backend.logins.load(Ordering::SeqCst),
        report.iterations.scenario_executed + 1
    );
    assert_eq!(backend.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_functional_preset_runs_one_iteration() -> Result<()> {
    let server = StubServer::start().await?;
    let mut config = Preset::Functional.build().plan()?.clone();
    config.scenarios[0].think_time = None;

    let report = orchestrator(&server, &config)?.run().await;

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.iterations.started, 1);
    assert_eq!(report.iterations.scenario_executed, 1);
    assert_eq!(report.vus_peak, 1);
    // No pacing pause once the only iteration is spent
    assert!(report.duration_ms < 1_000, "ran {}ms", report.duration_ms);
    assert_eq!(server.backend.logins.load(Ordering::SeqCst), 2);
    assert_eq!(server.backend.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_samples_carry_phase_at_call_start() -> Result<()> {
    let server = StubServer::start().await?;
    let mut config = browse_plan(
        LoadShapeConfig::ConstantVus {
            vus: 2,
            duration: secs(2),
        },
        vec![search(), details("S00000050")],
    );
    config.phases = vec![
        PhaseConfig {
            name: "WARMUP".to_string(),
            start: Duration::ZERO,
            end: secs(1),
            error_threshold: None,
            window: None,
        },
        PhaseConfig {
            name: "STEADY".to_string(),
            start: secs(1),
            end: secs(2),
            error_threshold: None,
            window: None,
        },
    ];
    config.record_samples = true;

    let report = orchestrator(&server, &config)?.run().await;

    let requests: Vec<_> = report.samples.iter().filter(|s| s.is_request()).collect();
    assert!(!requests.is_empty());
    for sample in requests {
        let expected = if sample.timestamp_ms < 1000 { "WARMUP" } else { "STEADY" };
        assert_eq!(sample.phase, expected, "{} at {}ms", sample.metric_key, sample.timestamp_ms);
    }
    assert!(report.summary.entry("search", "WARMUP").is_some());
    assert!(report.summary.entry("search", "STEADY").is_some());
    Ok(())
}

#[tokio::test]
async fn test_critical_step_halts_every_iteration() -> Result<()> {
    let server = StubServer::start().await?;
    let mut gate = StepConfig::get("problem_details", "/problems/BAD/details", &[200]);
    gate.critical = true;
    let config = browse_plan(
        LoadShapeConfig::ConstantVus {
            vus: 1,
            duration: secs(1),
        },
        vec![gate, search()],
    );

    let report = orchestrator(&server, &config)?.run().await;

    let it = &report.iterations;
    assert!(it.scenario_executed > 0);
    assert_eq!(it.halted_by_critical_step, it.scenario_executed);
    assert!(report.summary.total("search").is_none());
    let gate = report.summary.total("problem_details").expect("gate step recorded");
    assert_eq!(gate.failures(), it.scenario_executed);

    // Halted iterations still log out
    let backend = &server.backend;
    assert_eq!(
        backend.logouts.load(Ordering::SeqCst),
        backend.logins.load(Ordering::SeqCst)
    );
    Ok(())
}

#[tokio::test]
async fn test_server_errors_abort_the_run() -> Result<()> {
    let server = StubServer::start().await?;
    server.backend.fail_details_with(503);
    let mut config = browse_plan(
        LoadShapeConfig::ConstantVus {
            vus: 4,
            duration: secs(30),
        },
        vec![search(), details("S00000050")],
    );
    config.abort = AbortConfig {
        enabled: true,
        window: secs(5),
        error_threshold: 5,
    };

    let report = orchestrator(&server, &config)?.run().await;

    assert_eq!(report.stop_reason, StopReason::Aborted);
    assert!(report.duration_ms < 10_000, "ran for {}ms", report.duration_ms);
    let abort = report.abort.as_ref().expect("abort record");
    assert_eq!(abort.window.error_threshold, 5);
    assert!(abort.window.error_count >= 5);
    assert!(!report.passed());
    assert_eq!(report.verdict, Verdict::Overloaded);
    Ok(())
}

#[tokio::test]
async fn test_arrival_rate_paces_iteration_starts() -> Result<()> {
    let server = StubServer::start().await?;
    let config = browse_plan(
        LoadShapeConfig::ConstantArrivalRate {
            rate: 20,
            time_unit: secs(1),
            duration: secs(2),
            pre_allocated_vus: 5,
            max_vus: 10,
        },
        vec![search()],
    );

    let report = orchestrator(&server, &config)?.run().await;

    let started = report.iterations.started;
    assert!((30..=42).contains(&started), "started {}", started);
    assert_eq!(report.backpressure_drops, 0);
    assert!(report.vus_allocated_peak <= 10);
    Ok(())
}
