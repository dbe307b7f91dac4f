//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use sharednotes_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "server_url": config.server_url,
                    "poll_interval_ms": config.poll_interval_ms,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  server_url:           {}", config.server_url);
            println!("  poll_interval_ms:     {}", config.poll_interval_ms);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_url" => {
            if value.is_empty() {
                bail!("server_url cannot be empty");
            }
            config.server_url = value.trim_end_matches('/').to_string();
        }
        "poll_interval_ms" => {
            config.poll_interval_ms = value
                .parse()
                .context("Invalid value for poll_interval_ms. Use a number of milliseconds.")?;
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = value
                .parse()
                .context("Invalid value for request_timeout_secs. Use a number of seconds.")?;
        }
        "log_file" => {
            config.log_file = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.into())
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, server_url, poll_interval_ms, request_timeout_secs, log_file",
                key
            );
        }
    }

    Ok(())
}
