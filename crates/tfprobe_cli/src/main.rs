//! tfprobe CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Scenario failure
//! - 4: Cleanup failure

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, RunFailure};
use tfprobe_core::HarnessError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const SCENARIO_FAILURE: u8 = 3;
    pub const CLEANUP_FAILURE: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Id(args) => commands::id::execute(args).await,
        Commands::Destroy(args) => commands::destroy::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Logs go to stderr so JSON reports on stdout stay parseable.
fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "tfprobe=debug,warn"
    } else if cli.quiet {
        "warn"
    } else {
        "tfprobe=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    let log_result = if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(failure) = e.downcast_ref::<RunFailure>() {
        return match failure {
            RunFailure::Scenarios(_) => ExitCodes::SCENARIO_FAILURE,
            RunFailure::Cleanup(_) => ExitCodes::CLEANUP_FAILURE,
        };
    }

    match e.downcast_ref::<HarnessError>() {
        Some(HarnessError::Configuration(_) | HarnessError::Yaml(_) | HarnessError::Io(_)) => {
            ExitCodes::INVALID_ARGS
        }
        _ if e.to_string().starts_with("Scenario not found") => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
