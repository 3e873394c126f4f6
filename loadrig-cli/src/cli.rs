//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use loadrig_config::Preset;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test plan against the target
    Run {
        /// Plan file (YAML, or JSON by extension)
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,

        /// Override the target base URL
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// Also write the report as JSON
        #[arg(long, value_name = "PATH")]
        json_out: Option<PathBuf>,

        /// Skip the pre-flight login/logout check
        #[arg(long)]
        no_preflight: bool,
    },

    /// Check a plan file without running it
    Validate {
        /// Plan file (YAML, or JSON by extension)
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,
    },

    /// Write a built-in plan to a file
    Generate {
        /// functional, capacity, spike, failover, latency or arrival
        #[arg(long, value_name = "NAME")]
        preset: Preset,

        /// Output file; `.json` writes JSON, anything else YAML
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration, env overrides applied
    Show {
        /// Path to configuration file (optional, defaults plus environment otherwise)
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}
