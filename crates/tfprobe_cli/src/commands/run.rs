//! Run command - Run the scenarios of a suite file.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::{info, warn};

use tfprobe_core::{
    AwsCliProvider, CancelSignal, LifecycleDriver, ScenarioReport, ScenarioRunner,
    ScenarioStatus, StateVerifier, SuiteReport,
};

use super::{load_suite, OverrideArgs, RunFailure, ToolArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Suite file (YAML)
    pub suite: PathBuf,

    /// Only run the named scenarios (repeatable)
    #[arg(long)]
    pub only: Vec<String>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Per-scenario timeout in seconds, cleanup excluded
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[command(flatten)]
    pub tool: ToolArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let mut overrides = args.overrides.to_overrides();
    overrides.timeout = args.timeout_secs.map(Duration::from_secs);

    let mut suite = load_suite(&args.suite, &overrides)?;
    if !args.only.is_empty() {
        suite.retain(&args.only)?;
    }
    info!("Running suite {} ({} scenarios)", suite.name(), suite.len());

    let tool = args.tool.build_tool()?;
    if args.tool.dry_run {
        warn!("Dry-run: resource checks are skipped");
        suite = suite.without_checks();
    }

    let runner = ScenarioRunner::new(
        LifecycleDriver::new(Arc::new(tool)),
        StateVerifier::new(Arc::new(AwsCliProvider::new())),
    );

    let (handle, signal) = CancelSignal::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling scenarios, cleanup will still run");
            handle.cancel();
        }
    });

    let report = suite.run(&runner, signal).await;

    match args.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if report.has_cleanup_failures() {
        return Err(RunFailure::Cleanup(report.summary.cleanup_failures).into());
    }
    if !report.passed() {
        let failed = report.summary.failed + report.summary.errored;
        return Err(RunFailure::Scenarios(failed).into());
    }

    Ok(())
}

fn print_text(report: &SuiteReport) {
    println!("🧪 Suite: {}", report.name);
    println!();
    for scenario in &report.scenarios {
        print_scenario(scenario);
    }
    println!();

    let summary = &report.summary;
    println!(
        "{} passed, {} failed, {} errored ({} total)",
        summary.passed, summary.failed, summary.errored, summary.total
    );
    if summary.cleanup_failures > 0 {
        println!(
            "⚠️  {} scenario(s) could not be cleaned up; run `tfprobe destroy` with the identifiers above",
            summary.cleanup_failures
        );
    }
}

fn print_scenario(scenario: &ScenarioReport) {
    let icon = match scenario.status {
        ScenarioStatus::Passed => "✅",
        ScenarioStatus::Failed => "❌",
        ScenarioStatus::Errored => "💥",
    };
    let id = scenario
        .identifier
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} {} [{}] ({:.1}s)",
        icon,
        scenario.name,
        id,
        scenario.duration_ms as f64 / 1000.0
    );

    if let Some(failure) = &scenario.failure {
        println!("   {}: {}", failure.phase, failure.message);
    }
    if let Some(cleanup) = &scenario.cleanup_failure {
        println!("   ⚠️  cleanup: {}", cleanup.message);
    }
}
