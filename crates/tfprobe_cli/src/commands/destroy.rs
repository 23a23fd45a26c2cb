//! Destroy command - Tear down an earlier run by identifier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{error, info};

use tfprobe_core::{LifecycleDriver, RunIdentifier};

use super::{load_suite, OverrideArgs, RunFailure, ToolArgs};

#[derive(Args)]
pub struct DestroyArgs {
    /// Suite file (YAML)
    pub suite: PathBuf,

    /// Scenario whose run to destroy
    #[arg(long)]
    pub scenario: String,

    /// Identifier of the run, as printed in its report
    #[arg(long)]
    pub run_id: String,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(flatten)]
    pub tool: ToolArgs,
}

pub async fn execute(args: DestroyArgs) -> Result<()> {
    let identifier = RunIdentifier::parse(&args.run_id)?;
    let mut overrides = args.overrides.to_overrides();
    overrides.identifier = Some(identifier.clone());

    let suite = load_suite(&args.suite, &overrides)?;
    let entry = suite
        .get(&args.scenario)
        .with_context(|| format!("Scenario not found in suite: {}", args.scenario))?;
    let options = entry.scenario.options(&identifier)?;

    info!("Destroying {} run {}", entry.name, identifier);
    let driver = LifecycleDriver::new(Arc::new(args.tool.build_tool()?));
    driver.initialize(&options).await?;

    if let Err(e) = driver.destroy(&options).await {
        error!("Destroy of {} failed: {}", identifier, e);
        return Err(anyhow::Error::new(e).context(RunFailure::Cleanup(1)));
    }

    println!("✅ Destroyed {} ({})", entry.name, identifier);
    Ok(())
}
