use anyhow::{Context, Result};
use clap::Parser;
use loadrig_config::{ConfigLoader, LoadrigConfig, LogLevel};
use loadrig_logging::{init_logging, init_simple_tracing, LoggingGuard};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info};

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};
use commands::config::handle_config_show;
use commands::plan::{handle_generate, handle_validate};
use commands::run::handle_run;

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&Path>) -> Result<LoadrigConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Initialize logging from configuration; `--log-level` wins over the file.
/// Falls back to plain stderr tracing if the configured targets fail.
fn init_logging_with_config(
    config: &LoadrigConfig,
    log_level: Option<&str>,
) -> Result<Option<LoggingGuard>> {
    let mut logging_config = config.logging.clone();
    if let Some(level) = log_level {
        logging_config.level = level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid --log-level")?;
    }

    match init_logging(&logging_config) {
        Ok(guard) => {
            debug!("Structured logging initialized");
            Ok(Some(guard))
        }
        Err(e) => {
            eprintln!(
                "Failed to initialize structured logging: {}, falling back to simple tracing",
                e
            );
            init_simple_tracing(logging_config.level.as_str())?;
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        cmd.print_help().context("Failed to print help")?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    let config_path = match &command {
        Commands::Run { plan, .. } | Commands::Validate { plan } => Some(plan.as_path()),
        Commands::Config {
            config_cmd: ConfigCommands::Show { config_file, .. },
        } => config_file.as_deref(),
        Commands::Generate { .. } => None,
    };
    let config = load_config(config_path)?;
    let _logging = init_logging_with_config(&config, cli.log_level.as_deref())?;
    info!("loadrig {} starting", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Run {
            plan,
            base_url,
            json_out,
            no_preflight,
        } => {
            debug!("Running plan from {:?}", plan);
            handle_run(config, base_url.as_deref(), json_out.as_deref(), no_preflight).await
        }
        Commands::Validate { plan } => {
            handle_validate(&config, &plan)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Generate {
            preset,
            output,
            force,
        } => {
            handle_generate(preset, &output, force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Show {
                config_file: _,
                format,
            } => {
                handle_config_show(&config, &format)?;
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}
