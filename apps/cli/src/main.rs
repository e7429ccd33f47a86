//! keyrotor - authorization-server key rotation
//!
//! Run `keyrotor rotate` from a scheduler at the rotation interval; each
//! invocation is one complete run.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod wiring;

use config::{AppConfig, ConfigSource, Overrides};

/// keyrotor - rotate signing and encryption keys of an authorization server
#[derive(Parser, Debug)]
#[command(name = "keyrotor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file [default: keyrotor.toml, if present]
    #[arg(short, long, global = true, env = "KEYROTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one rotation
    Rotate {
        /// Generate and merge keys, then stop before any change
        #[arg(long)]
        dry_run: bool,

        /// Rotation interval in hours
        #[arg(long, value_name = "HOURS")]
        interval: Option<u64>,

        /// Do not push artifacts to running instances
        #[arg(long)]
        no_push: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Load and validate the configuration
    Check,

    /// Print the effective configuration (secrets omitted)
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let source = ConfigSource::from_arg(cli.config);

    let overrides = match &cli.command {
        Commands::Rotate {
            dry_run,
            interval,
            no_push,
            ..
        } => Overrides {
            dry_run: *dry_run,
            no_push: *no_push,
            interval_hours: *interval,
        },
        Commands::Config(_) => Overrides::default(),
    };

    let config = match AppConfig::load(&source, &overrides) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let _log_guard = match keyrotor_log::init_with_env_override(config.log.clone()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    let result = match cli.command {
        Commands::Rotate { json, .. } => commands::rotate::run(config, json).await,
        Commands::Config(ConfigCommands::Check) => commands::config::check(&config),
        Commands::Config(ConfigCommands::Show) => commands::config::show(&config),
    };

    result.unwrap_or_else(|e| fail(&e))
}

fn fail(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    ExitCode::FAILURE
}
