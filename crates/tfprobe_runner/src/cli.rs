//! CLI-based IaC tool supporting Terraform and OpenTofu.
//!
//! This module spawns the `terraform` (or `tofu`) binary for each lifecycle
//! command, streams its output through `tracing`, and turns non-zero exits
//! into [`ToolError::CommandFailed`] carrying the captured output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ToolInvocation;
use crate::error::{ToolError, ToolResult};
use crate::tool::{CommandOutput, IacTool};

/// IaC binary flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IacBinary {
    Terraform,
    #[serde(rename = "tofu")]
    OpenTofu,
}

impl IacBinary {
    /// Get the CLI command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::OpenTofu => "tofu",
        }
    }
}

impl std::fmt::Display for IacBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

/// Log output from a tool command.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

impl LogLine {
    /// Render the line for a terminal, with CI-compatible timestamps if asked.
    pub fn render(&self, ci_mode: bool) -> String {
        if ci_mode {
            format!(
                "[{}] [{}] {}",
                self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                self.stream,
                self.message
            )
        } else {
            self.message.clone()
        }
    }
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// How long a timed-out command may take to exit after an interrupt.
pub const DEFAULT_INTERRUPT_GRACE_SECONDS: u64 = 60;

/// CLI-based tool options.
#[derive(Debug, Clone, Default)]
pub struct TerraformCliOptions {
    /// Preferred binary (if not set, auto-detect)
    pub preferred_binary: Option<IacBinary>,
    /// Explicit path to the binary, skipping detection
    pub binary_path: Option<PathBuf>,
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// Wait after interrupting a timed-out command before killing it
    pub interrupt_grace: Option<Duration>,
}

impl TerraformCliOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn prefer_terraform(mut self) -> Self {
        self.preferred_binary = Some(IacBinary::Terraform);
        self
    }

    pub fn prefer_tofu(mut self) -> Self {
        self.preferred_binary = Some(IacBinary::OpenTofu);
        self
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = Some(grace);
        self
    }
}

/// CLI-based IaC tool.
pub struct TerraformCli {
    binary: IacBinary,
    program: String,
    options: TerraformCliOptions,
    log_handler: Option<LogHandler>,
}

impl TerraformCli {
    /// Create a new CLI tool with automatic binary detection.
    pub fn new(options: TerraformCliOptions) -> ToolResult<Self> {
        let binary = options.preferred_binary.unwrap_or(IacBinary::Terraform);
        if let Some(path) = &options.binary_path {
            let program = path.to_string_lossy().to_string();
            info!("Using IaC binary at {}", program);
            return Ok(Self {
                binary,
                program,
                options,
                log_handler: None,
            });
        }

        let binary = Self::detect_binary(&options)?;
        info!("Using IaC binary: {}", binary);

        Ok(Self::with_binary(binary, options))
    }

    /// Create a tool bound to a specific binary.
    pub fn with_binary(binary: IacBinary, options: TerraformCliOptions) -> Self {
        Self {
            binary,
            program: binary.command().to_string(),
            options,
            log_handler: None,
        }
    }

    /// Set a log handler for streaming output.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Detect an available binary.
    pub fn detect_binary(options: &TerraformCliOptions) -> ToolResult<IacBinary> {
        if let Some(preferred) = options.preferred_binary {
            if Self::is_binary_available(preferred) {
                return Ok(preferred);
            }
            warn!("Preferred binary {} not available, trying alternatives", preferred);
        }

        if Self::is_binary_available(IacBinary::Terraform) {
            return Ok(IacBinary::Terraform);
        }

        if Self::is_binary_available(IacBinary::OpenTofu) {
            return Ok(IacBinary::OpenTofu);
        }

        Err(ToolError::NotAvailable(
            "Neither terraform nor tofu is on PATH".to_string(),
        ))
    }

    fn is_binary_available(binary: IacBinary) -> bool {
        Command::new(binary.command())
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Get the binary flavour in use.
    pub fn binary(&self) -> IacBinary {
        self.binary
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    pub fn init_args(&self, invocation: &ToolInvocation) -> Vec<String> {
        let mut args = vec![
            "init".to_string(),
            "-upgrade=false".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(invocation.backend_args());
        args
    }

    pub fn apply_args(&self, invocation: &ToolInvocation) -> Vec<String> {
        let mut args = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
            "-no-color".to_string(),
            "-lock=true".to_string(),
        ];
        args.extend(invocation.var_args());
        args
    }

    pub fn destroy_args(&self, invocation: &ToolInvocation) -> Vec<String> {
        let mut args = vec![
            "destroy".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(invocation.var_args());
        args
    }

    pub fn output_args(&self, name: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "output".to_string(),
            "-no-color".to_string(),
            "-json".to_string(),
        ];
        if let Some(name) = name {
            args.push(name.to_string());
        }
        args
    }

    /// Format command for logging.
    fn format_command(&self, args: &[String]) -> String {
        let mut cmd = self.program.clone();
        for arg in args {
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }

    /// Spawn the binary and capture output, streaming each line as it arrives.
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        args: &[String],
    ) -> ToolResult<CommandOutput> {
        let command = self.format_command(args);
        debug!("Executing: {} (in {:?})", command, invocation.working_dir);

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {}", command);
            let now = Utc::now();
            return Ok(CommandOutput {
                stdout: format!("[DRY-RUN] Command: {}", command),
                command,
                exit_code: 0,
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            binary: self.program.clone(),
            message: e.to_string(),
        })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(ToolError::Spawn {
                    binary: self.program.clone(),
                    message: "child process pipes unavailable".to_string(),
                })
            }
        };

        let started_at = Utc::now();
        let handler = self.log_handler.clone();
        // Readers run on their own tasks so output keeps draining while a
        // timed-out child is shutting down.
        let stdout = tokio::spawn(collect_lines(stdout, LogStream::Stdout, handler.clone()));
        let stderr = tokio::spawn(collect_lines(stderr, LogStream::Stderr, handler));

        let status = if invocation.timeout_seconds > 0 {
            let limit = Duration::from_secs(invocation.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_elapsed) => {
                    error!("{} timed out after {}s", command, invocation.timeout_seconds);
                    self.interrupt(&mut child).await;
                    return Err(ToolError::Timeout(invocation.timeout_seconds));
                }
            }
        } else {
            child.wait().await?
        };
        let stdout = joined(stdout).await?;
        let stderr = joined(stderr).await?;

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().unwrap_or(-1) as i64;

        if exit_code == 0 {
            debug!("{} completed in {}ms", command, duration_ms);
        } else {
            warn!("{} exited with code {} after {}ms", command, exit_code, duration_ms);
        }

        Ok(CommandOutput {
            command,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }

    /// Ask a running child to stop, then kill it if it outlives the grace period.
    ///
    /// Terraform treats SIGINT as a graceful stop: it finishes the resource
    /// operations in flight and writes state before exiting.
    async fn interrupt(&self, child: &mut Child) {
        let grace = self
            .options
            .interrupt_grace
            .unwrap_or(Duration::from_secs(DEFAULT_INTERRUPT_GRACE_SECONDS));

        if send_interrupt(child).await {
            warn!("Interrupted {}, waiting up to {:?} for it to exit", self.binary, grace);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("{} stopped after interrupt ({})", self.binary, status);
                    return;
                }
                Ok(Err(e)) => warn!("Waiting for {} failed: {}", self.binary, e),
                Err(_elapsed) => warn!("{} ignored the interrupt", self.binary),
            }
        }

        error!("Killing {}; its state may be missing resources it created", self.binary);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill {}: {}", self.binary, e);
        }
    }

    /// Execute and turn a non-zero exit into an error.
    async fn execute_checked(
        &self,
        invocation: &ToolInvocation,
        args: &[String],
    ) -> ToolResult<CommandOutput> {
        let output = self.execute(invocation, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ToolError::CommandFailed {
                exit_code: output.exit_code,
                output: output.combined_output(),
                command: output.command,
            })
        }
    }
}

#[cfg(unix)]
async fn send_interrupt(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    tokio::process::Command::new("sh")
        .args(["-c", &format!("kill -INT {}", pid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn send_interrupt(_child: &Child) -> bool {
    false
}

async fn joined(task: JoinHandle<std::io::Result<String>>) -> ToolResult<String> {
    match task.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(ToolError::Io(std::io::Error::other(e.to_string()))),
    }
}

async fn collect_lines<R>(
    reader: R,
    stream: LogStream,
    handler: Option<LogHandler>,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut output = String::new();
    while let Some(line) = lines.next_line().await? {
        debug!(target: "tfprobe_runner::tool_output", %stream, "{}", line);
        if let Some(handler) = &handler {
            handler(LogLine {
                timestamp: Utc::now(),
                stream,
                message: line.clone(),
            });
        }
        output.push_str(&line);
        output.push('\n');
    }
    Ok(output)
}

/// Render a JSON output value: strings raw, everything else as JSON text.
fn render_output_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_missing_output(failure: &str) -> bool {
    let lower = failure.to_lowercase();
    lower.contains("could not be found") || lower.contains("not found")
}

/// One entry of `output -json`.
#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

#[async_trait]
impl IacTool for TerraformCli {
    async fn is_available(&self) -> ToolResult<bool> {
        Ok(tokio::process::Command::new(&self.program)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false))
    }

    async fn version(&self) -> ToolResult<String> {
        let output = tokio::process::Command::new(&self.program)
            .args(["version", "-json"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                binary: self.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Option<String> = serde_json::from_str::<serde_json::Value>(&stdout)
            .ok()
            .and_then(|v| v.get("terraform_version").and_then(|s| s.as_str()).map(String::from));

        match parsed {
            Some(version) => Ok(format!("{} {}", self.binary, version)),
            None => Ok(stdout.lines().next().unwrap_or_default().trim().to_string()),
        }
    }

    async fn init(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        info!("Running {} init in {:?}", self.binary, invocation.working_dir);
        self.execute_checked(invocation, &self.init_args(invocation)).await
    }

    async fn apply(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        info!("Running {} apply in {:?}", self.binary, invocation.working_dir);
        self.execute_checked(invocation, &self.apply_args(invocation)).await
    }

    async fn destroy(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        info!("Running {} destroy in {:?}", self.binary, invocation.working_dir);
        self.execute_checked(invocation, &self.destroy_args(invocation)).await
    }

    async fn output(&self, invocation: &ToolInvocation, name: &str) -> ToolResult<String> {
        if self.options.dry_run {
            info!("[DRY-RUN] Output {} is unknown without an apply", name);
            return Err(ToolError::OutputNotFound(name.to_string()));
        }

        let result = self
            .execute_checked(invocation, &self.output_args(Some(name)))
            .await;

        match result {
            Ok(output) => {
                let value: serde_json::Value = serde_json::from_str(output.stdout.trim())?;
                Ok(render_output_value(&value))
            }
            Err(ToolError::CommandFailed { output, .. }) if is_missing_output(&output) => {
                Err(ToolError::OutputNotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn outputs(&self, invocation: &ToolInvocation) -> ToolResult<HashMap<String, String>> {
        if self.options.dry_run {
            return Ok(HashMap::new());
        }

        let output = self
            .execute_checked(invocation, &self.output_args(None))
            .await?;

        let entries: HashMap<String, OutputEntry> = serde_json::from_str(output.stdout.trim())
            .map_err(|e| ToolError::MalformedOutput(format!("output -json: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|(name, entry)| (name, render_output_value(&entry.value)))
            .collect())
    }
}
