//! SharedNotes CLI
//!
//! Command-line interface for SharedNotes - notes kept in sync with a
//! shared server.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sharednotes_core::{Config, SyncEngine};

mod commands;
mod editor;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "sharednotes")]
#[command(about = "SharedNotes - notes shared through a sync server")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log sync activity (repeat for more detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a note, printing every new version until Ctrl-C
    Watch {
        /// Note title
        title: String,
    },
    /// Edit a note and push it to the server
    Edit {
        /// Note title
        title: String,
        /// New content (opens editor if not provided)
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Show the local copy of a note
    Show {
        /// Note title
        title: String,
    },
    /// List local notes
    #[command(alias = "ls")]
    List,
    /// Delete the local copy of a note
    #[command(alias = "rm")]
    Delete {
        /// Note title
        title: String,
    },
    /// Fetch the server's copy of a note without storing it
    Fetch {
        /// Note title
        title: String,
    },
    /// Check that the server is reachable
    Ping {
        /// Message for the server to echo back
        #[arg(default_value = "ping")]
        message: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, server_url, poll_interval_ms, request_timeout_secs, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();
    let verbose = cli.verbose;

    match cli.command {
        // Config commands must work even when the stored config is unusable
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        },
        Commands::Ping { message } => {
            let config = setup(config_path, verbose)?;
            commands::remote::ping(&config, &message, &output).await
        }
        Commands::Watch { title } => {
            let mut engine = open_engine(config_path, verbose)?;
            commands::watch::watch(&mut engine, title, &output).await
        }
        Commands::Edit { title, content } => {
            let mut engine = open_engine(config_path, verbose)?;
            commands::edit::edit(&mut engine, title, content, &output).await
        }
        Commands::Show { title } => {
            commands::note::show(&open_engine(config_path, verbose)?, title, &output)
        }
        Commands::List => commands::note::list(&open_engine(config_path, verbose)?, &output),
        Commands::Delete { title } => {
            commands::note::delete(&open_engine(config_path, verbose)?, title, &output)
        }
        Commands::Fetch { title } => {
            commands::remote::fetch(&open_engine(config_path, verbose)?, title, &output).await
        }
    }
}

/// Load configuration and start logging
fn setup(config_path: Option<&PathBuf>, verbose: u8) -> Result<Config> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, verbose);
    Ok(config)
}

fn open_engine(config_path: Option<&PathBuf>, verbose: u8) -> Result<SyncEngine> {
    let config = setup(config_path, verbose)?;
    SyncEngine::open(&config).context("Failed to open note store")
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over `--verbose`. Logs go to `log_file` when configured,
/// stderr otherwise.
fn init_logging(config: &Config, verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sharednotes_core={},sharednotes_cli={}",
            log_level, log_level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore errors if a subscriber is already installed
    match &config.log_file {
        Some(path) => {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let _ = builder.with_ansi(false).with_writer(file).try_init();
                }
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    let _ = builder.with_writer(std::io::stderr).try_init();
                }
            }
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
