//! Session client and single iterations against the in-process backend

mod support;

use anyhow::Result;
use loadrig_config::{
    AbortConfig, CredentialConfig, ExecutorConfig, HttpConfig, LoadShapeConfig, PlanConfig,
    ScenarioConfig, StepConfig,
};
use loadrig_core::metrics::{LOGIN, LOGOUT};
use loadrig_core::{Credentials, HttpMethod, JourneyStep, MetricsSink, Outcome, DEFAULT_PHASE};
use loadrig_execution::{execute, IterationOutcome, RunContext, TestPlan};
use loadrig_http::{
    AuthError, HttpSessionClient, PreparedRequest, RequestError, Session, SessionClient,
};
use loadrig_resilience::{AbortPolicy, DrainCoordinator};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::StubServer;

fn fulano4() -> Credentials {
    Credentials::new("fulano4", "fulano4")
}

fn prepared(step: JourneyStep) -> PreparedRequest {
    PreparedRequest::from_step(&step, &HashMap::new())
}

fn single_user_plan(steps: Vec<StepConfig>) -> PlanConfig {
    PlanConfig {
        name: "smoke".to_string(),
        description: None,
        executors: vec![ExecutorConfig::new(
            "main",
            LoadShapeConfig::ConstantVus {
                vus: 1,
                duration: Duration::from_secs(1),
            },
        )],
        phases: Vec::new(),
        abort: AbortConfig::default(),
        thresholds: BTreeMap::new(),
        credentials: vec![CredentialConfig::same("fulano4")],
        pools: BTreeMap::new(),
        scenarios: vec![ScenarioConfig {
            name: "browse".to_string(),
            weight: None,
            think_time: None,
            pacing: None,
            steps,
        }],
        max_duration: None,
        grace_period: Duration::from_secs(5),
        preflight: false,
        record_samples: true,
    }
}

#[tokio::test]
async fn test_single_iteration_records_four_requests() -> Result<()> {
    let server = StubServer::start().await?;
    let config = single_user_plan(vec![
        StepConfig::get("search", "/problems/key/S", &[200, 404]),
        StepConfig::get("problem_details", "/problems/S00000050/details", &[200, 404, 422]),
    ]);
    let plan = TestPlan::compile(&config, Duration::from_secs(5))?;
    let ctx = RunContext::new(
        Arc::new(plan),
        Arc::new(server.client()?),
        MetricsSink::with_sample_log(),
        AbortPolicy::disabled(),
        DrainCoordinator::new(),
    );

    let mut rng = fastrand::Rng::with_seed(4);
    let iteration = execute(&ctx, &mut rng).await;

    assert_eq!(
        iteration.outcome,
        IterationOutcome::ScenarioExecuted {
            failed_steps: 0,
            halted_at: None
        }
    );

    let requests: Vec<_> = ctx
        .sink
        .samples()
        .into_iter()
        .filter(|s| s.is_request())
        .collect();
    let keys: Vec<&str> = requests.iter().map(|s| s.metric_key.as_str()).collect();
    assert_eq!(keys, vec![LOGIN, "search", "problem_details", LOGOUT]);
    for sample in &requests {
        assert_eq!(sample.phase, DEFAULT_PHASE);
        let outcome = sample.outcome.expect("request samples carry an outcome");
        assert!(!outcome.is_failure(), "{} failed: {}", sample.metric_key, outcome);
    }

    let backend = &server.backend;
    assert_eq!(backend.logins.load(Ordering::SeqCst), 1);
    assert_eq!(backend.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(backend.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_login_sets_session_from_cookies() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;

    let (session, timing) = client.login(&fulano4()).await?;

    assert!(session.token().starts_with("fulano4-"));
    assert_eq!(session.display_name(), "Fulano");
    assert_eq!(session.username(), "fulano4");
    assert_eq!(timing.status, 200);
    assert_eq!(timing.outcome, Outcome::Success { status: 200 });
    assert!(timing.waiting <= timing.latency);
    assert_eq!(server.backend.open_sessions(), 1);
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_is_invalid_credentials() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;

    let result = client.login(&Credentials::new("fulano4", "wrong")).await;

    let err = result.expect_err("login with a wrong password must fail");
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(err.outcome(), Outcome::Unauthorized);
    assert_eq!(server.backend.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_second_logout_is_unauthorized() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (mut session, _) = client.login(&fulano4()).await?;

    let first = client.logout(&mut session).await?;
    assert_eq!(first.status, 204);
    assert!(!session.is_valid());

    let second = client.logout(&mut session).await;
    assert_eq!(second, Err(RequestError::Unauthorized));
    // Rejected locally, the backend only saw one logout
    assert_eq!(server.backend.logouts.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_request_after_logout_is_unauthorized() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (mut session, _) = client.login(&fulano4()).await?;
    let stale = session.clone();
    client.logout(&mut session).await?;

    let search = prepared(JourneyStep::get("search", "/problems/key/S").accept([200, 404]));
    let local = client.authenticated_request(&session, &search).await;
    assert_eq!(local, Err(RequestError::Unauthorized));

    // A copy taken before logout still carries the token; the server refuses it
    let remote = client.authenticated_request(&stale, &search).await;
    assert_eq!(remote, Err(RequestError::Unauthorized));
    Ok(())
}

#[tokio::test]
async fn test_forged_session_is_unauthorized() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let forged = Session::new("not-a-token", "Fulano", "fulano4");

    let search = prepared(JourneyStep::get("search", "/problems/key/S"));
    let result = client.authenticated_request(&forged, &search).await;

    assert_eq!(result, Err(RequestError::Unauthorized));
    assert_eq!(server.backend.requests.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_listed_not_found_is_expected_negative() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (session, _) = client.login(&fulano4()).await?;

    let listed = prepared(JourneyStep::get("search", "/problems/key/X").accept([200, 404]));
    let timing = client.authenticated_request(&session, &listed).await?;
    assert_eq!(timing.status, 404);
    assert_eq!(timing.outcome, Outcome::ExpectedNegative { status: 404 });
    assert!(!timing.outcome.is_failure());

    let unlisted = prepared(JourneyStep::get("search", "/problems/key/X").accept([200]));
    let result = client.authenticated_request(&session, &unlisted).await;
    let err = result.expect_err("404 is not acceptable here");
    assert_eq!(err, RequestError::Unexpected { status: 404 });
    assert!(err.outcome().is_failure());
    assert!(!err.outcome().is_critical());
    Ok(())
}

#[tokio::test]
async fn test_malformed_code_is_unprocessable() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (session, _) = client.login(&fulano4()).await?;

    let details = prepared(
        JourneyStep::get("problem_details", "/problems/BAD/details").accept([200, 404, 422]),
    );
    let timing = client.authenticated_request(&session, &details).await?;

    assert_eq!(timing.outcome, Outcome::ExpectedNegative { status: 422 });
    Ok(())
}

#[tokio::test]
async fn test_post_step_sends_json_body() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (session, _) = client.login(&fulano4()).await?;

    let create = prepared(JourneyStep::post(
        "create_solution",
        "/solutions",
        serde_json::json!({ "problemCode": "S00000050" }),
    ));
    assert_eq!(create.method, HttpMethod::Post);
    let timing = client.authenticated_request(&session, &create).await?;

    assert_eq!(timing.outcome, Outcome::Success { status: 200 });
    Ok(())
}

#[tokio::test]
async fn test_slow_step_times_out() -> Result<()> {
    let server = StubServer::start().await?;
    let client = server.client()?;
    let (session, _) = client.login(&fulano4()).await?;

    let slow = prepared(JourneyStep::get("slow", "/slow").with_timeout(Duration::from_millis(200)));
    let result = client.authenticated_request(&session, &slow).await;

    let err = result.expect_err("the stub answers after two seconds");
    assert!(matches!(err, RequestError::Timeout { .. }), "{:?}", err);
    assert_eq!(err.outcome(), Outcome::Timeout);
    assert!(err.outcome().is_critical());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_target_is_connection_failure() -> Result<()> {
    let config = HttpConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        ..HttpConfig::default()
    };
    let client = HttpSessionClient::new(config.into())?;

    let err = client
        .login(&fulano4())
        .await
        .expect_err("nothing listens on port 1");

    assert!(matches!(err, AuthError::Unreachable { timed_out: false, .. }), "{:?}", err);
    assert_eq!(err.outcome(), Outcome::ConnectionFailed);
    Ok(())
}
