//! `loadrig config`

use anyhow::{Context, Result};
use loadrig_config::LoadrigConfig;
use tracing::info;

/// Print the effective configuration
pub fn handle_config_show(config: &LoadrigConfig, format: &str) -> Result<()> {
    info!("Showing configuration (format: {})", format);

    match format.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let yaml_output = config.to_yaml().context("Failed to serialize to YAML")?;
            println!("{}", yaml_output);
        }
        "json" => {
            let json_output = config.to_json().context("Failed to serialize to JSON")?;
            println!("{}", json_output);
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }

    Ok(())
}
