//! CLI command definitions.
//!
//! Each subcommand maps to one harness workflow: running a suite,
//! generating identifiers, or cleaning up an orphaned run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use tfprobe_core::{ScenarioOverrides, ScenarioSuite, SuiteFile};
use tfprobe_runner::{IacBinary, LogLine, TerraformCli, TerraformCliOptions};

pub mod destroy;
pub mod id;
pub mod run;

/// tfprobe - provisioning tests for infrastructure modules
#[derive(Parser)]
#[command(name = "tfprobe")]
#[command(version, about = "tfprobe - provisioning tests for infrastructure modules")]
#[command(long_about = r#"
tfprobe drives Terraform/OpenTofu modules through init, apply, verify and
destroy, checking that the resources they create really exist. Destroy runs
on every exit path once init has succeeded.

COMMANDS:
  run      → Run the scenarios of a suite file
  id       → Generate run identifiers
  destroy  → Tear down an earlier run by identifier

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Scenario failure
  4 - Cleanup failure (resources may be orphaned)
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scenarios of a suite file
    Run(run::RunArgs),

    /// Generate run identifiers
    Id(id::IdArgs),

    /// Tear down an earlier run by identifier
    Destroy(destroy::DestroyArgs),
}

/// Tool selection shared by the commands that invoke terraform.
#[derive(Args, Debug, Clone)]
pub struct ToolArgs {
    /// Binary to use (auto-detected when omitted)
    #[arg(long, value_enum)]
    pub binary: Option<BinaryArg>,

    /// Explicit path to the terraform/tofu binary
    #[arg(long, env = "TFPROBE_BINARY_PATH")]
    pub binary_path: Option<PathBuf>,

    /// Log the commands that would run without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Stream tool output to stderr
    #[arg(long)]
    pub stream: bool,

    /// Prefix streamed lines with timestamps and stream names
    #[arg(long)]
    pub ci: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BinaryArg {
    Terraform,
    Tofu,
}

impl ToolArgs {
    /// Build the terraform/tofu invocation layer.
    pub fn build_tool(&self) -> anyhow::Result<TerraformCli> {
        let mut options = TerraformCliOptions::new();
        match self.binary {
            Some(BinaryArg::Terraform) => options = options.prefer_terraform(),
            Some(BinaryArg::Tofu) => options = options.prefer_tofu(),
            None => {}
        }
        if let Some(path) = &self.binary_path {
            options = options.binary_path(path);
        }
        if self.dry_run {
            options = options.dry_run();
        }

        let tool = match TerraformCli::new(options.clone()) {
            Ok(tool) => tool,
            // Nothing is spawned in dry-run mode, so a missing binary is fine.
            Err(_) if self.dry_run => {
                let binary = options.preferred_binary.unwrap_or(IacBinary::Terraform);
                TerraformCli::with_binary(binary, options)
            }
            Err(e) => return Err(e.into()),
        };

        if self.stream {
            let ci = self.ci;
            Ok(tool.with_log_handler(Arc::new(move |line: LogLine| {
                eprintln!("{}", line.render(ci));
            })))
        } else {
            Ok(tool)
        }
    }
}

/// Values that win over the suite file.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Region for every scenario
    #[arg(long, env = "TFPROBE_REGION")]
    pub region: Option<String>,

    /// Identifier prefix for every scenario
    #[arg(long, env = "TFPROBE_PREFIX")]
    pub prefix: Option<String>,

    /// Module directory for every scenario
    #[arg(long, env = "TFPROBE_MODULE_DIR")]
    pub module_dir: Option<PathBuf>,
}

impl OverrideArgs {
    pub fn to_overrides(&self) -> ScenarioOverrides {
        ScenarioOverrides {
            region: self.region.clone(),
            prefix: self.prefix.clone(),
            module_dir: self.module_dir.clone(),
            ..Default::default()
        }
    }
}

/// Load a suite file, resolving relative module paths against its directory.
pub fn load_suite(path: &Path, overrides: &ScenarioOverrides) -> anyhow::Result<ScenarioSuite> {
    let file = SuiteFile::from_file(path)
        .with_context(|| format!("Failed to load suite file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let suite = file
        .into_suite(base_dir, overrides)
        .with_context(|| format!("Invalid suite file {}", path.display()))?;
    Ok(suite)
}

/// Outcomes that map to dedicated exit codes.
#[derive(Error, Debug)]
pub enum RunFailure {
    #[error("{0} scenario(s) failed")]
    Scenarios(usize),

    #[error("cleanup failed for {0} scenario(s); resources may be orphaned")]
    Cleanup(usize),
}
