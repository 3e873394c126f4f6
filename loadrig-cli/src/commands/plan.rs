//! `loadrig validate` and `loadrig generate`

use anyhow::{Context, Result};
use colored::Colorize;
use loadrig_config::{ConfigFormat, LoadrigConfig, Preset};
use loadrig_execution::{LoadShape, TestPlan};
use std::fs;
use std::path::Path;
use tracing::info;

/// Compile the plan and print what it would do
pub fn handle_validate(config: &LoadrigConfig, path: &Path) -> Result<()> {
    info!("Validating plan file: {:?}", path);

    let plan_config = config.plan().context("Plan file has no plan section")?;
    let plan = match TestPlan::compile(plan_config, config.http.timeout) {
        Ok(plan) => plan,
        Err(e) => {
            println!("{} Plan is invalid: {}", "✗".bright_red().bold(), e);
            return Err(e).context("Plan validation failed");
        }
    };

    println!("{} Plan '{}' is valid", "✓".bright_green().bold(), plan.name);
    println!("  target:    {}", config.http.base_url);
    for executor in &plan.executors {
        let delay = if executor.start_delay.is_zero() {
            String::new()
        } else {
            format!(" after {:?}", executor.start_delay)
        };
        println!(
            "  executor:  {} - {}{}",
            executor.name,
            describe_shape(&executor.shape),
            delay
        );
    }
    println!("  planned:   {:?}", plan.planned_duration());
    for scenario in plan.scenarios.iter() {
        let steps: Vec<_> = scenario.steps.iter().map(|s| s.name.as_str()).collect();
        println!("  scenario:  {} [{}]", scenario.name, steps.join(" -> "));
    }
    let phases: Vec<_> = plan.clock.phases().iter().map(|p| p.name.as_str()).collect();
    println!("  phases:    {}", phases.join(", "));
    println!("  thresholds: {}", plan.thresholds.len());
    Ok(())
}

fn describe_shape(shape: &LoadShape) -> String {
    match shape {
        LoadShape::ConstantVus { vus, duration } => format!("{} VUs for {:?}", vus, duration),
        LoadShape::RampingVus { curve, .. } => format!(
            "ramping VUs, {} stages, peak {}",
            curve.stages.len(),
            curve.stages.iter().map(|s| s.target).fold(curve.start, f64::max)
        ),
        LoadShape::ArrivalRate(arrival) => format!(
            "arrival rate, {:.0} iterations over {:?}, {}..{} VUs",
            arrival.curve.total(),
            arrival.curve.duration(),
            arrival.pre_allocated_vus,
            arrival.max_vus
        ),
        LoadShape::PerVuIterations {
            vus,
            iterations,
            max_duration,
        } => format!(
            "{} VUs x {} iterations each, within {:?}",
            vus, iterations, max_duration
        ),
        LoadShape::SharedIterations {
            vus,
            iterations,
            max_duration,
        } => format!(
            "{} VUs sharing {} iterations, within {:?}",
            vus, iterations, max_duration
        ),
    }
}

/// Write a built-in plan
pub fn handle_generate(preset: Preset, output: &Path, force: bool) -> Result<()> {
    info!("Generating {} plan at: {:?}", preset, output);

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    let config = preset.build();
    let content = match ConfigFormat::from_path(output) {
        ConfigFormat::Json => config.to_json(),
        ConfigFormat::Yaml => config.to_yaml(),
    }
    .context("Failed to serialize plan")?;
    fs::write(output, content).context("Failed to write plan file")?;

    println!("{} {} plan generated at: {:?}", "✓".bright_green().bold(), preset, output);
    println!("Validate with: loadrig validate --plan {:?}", output);
    Ok(())
}
