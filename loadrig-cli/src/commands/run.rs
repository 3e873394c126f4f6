//! `loadrig run`

use anyhow::{Context, Result};
use colored::Colorize;
use loadrig_config::LoadrigConfig;
use loadrig_execution::{Orchestrator, StopReason, TestPlan};
use loadrig_http::{HttpSessionClient, SessionClientConfig};
use std::future::pending;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code of a run stopped with Ctrl-C
const INTERRUPTED: u8 = 130;

pub async fn handle_run(
    mut config: LoadrigConfig,
    base_url: Option<&str>,
    json_out: Option<&Path>,
    no_preflight: bool,
) -> Result<ExitCode> {
    if let Some(url) = base_url {
        config.http.base_url = url.to_string();
        config.validate_all().context("Invalid --base-url")?;
    }

    let plan_config = config.plan().context("Nothing to run")?;
    let mut plan =
        TestPlan::compile(plan_config, config.http.timeout).context("Failed to compile plan")?;
    if no_preflight {
        plan.preflight = false;
    }

    info!(
        plan = %plan.name,
        base_url = %config.http.base_url,
        planned = ?plan.planned_duration(),
        "Starting run"
    );
    let client = HttpSessionClient::new(SessionClientConfig::from(config.http.clone()))
        .context("Failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(plan, Arc::new(client));

    let report = orchestrator
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => warn!("Ctrl-C received, stopping the run"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                    pending::<()>().await;
                }
            }
        })
        .await;

    println!("{}", report.render_text());

    if let Some(path) = json_out {
        let json = report.to_json().context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        println!("Report written to {:?}", path);
    }

    if report.stop_reason == StopReason::Interrupted {
        return Ok(ExitCode::from(INTERRUPTED));
    }
    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{}", "✗ Run failed: aborted or thresholds not met".bright_red().bold());
        Ok(ExitCode::FAILURE)
    }
}
