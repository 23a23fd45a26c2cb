//! IaC tool trait and types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ToolInvocation;
use crate::error::ToolResult;

/// Result of one tool command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Rendered command line
    pub command: String,
    /// Exit code from the process
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Command start time
    pub started_at: DateTime<Utc>,
    /// Command end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Check if the command was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// The IaC tool's lifecycle surface.
///
/// Implementations return `Err` for every non-successful command, carrying
/// the captured output so callers can classify the failure.
#[async_trait]
pub trait IacTool: Send + Sync {
    /// Check if the tool binary/endpoint is usable.
    async fn is_available(&self) -> ToolResult<bool>;

    /// Get tool version information.
    async fn version(&self) -> ToolResult<String>;

    /// Resolve providers and modules for the working directory.
    async fn init(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput>;

    /// Create or update the resources described by the module.
    async fn apply(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput>;

    /// Tear down every resource tracked in the module's state.
    async fn destroy(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput>;

    /// Read one output value. Non-string values are returned as JSON text.
    async fn output(&self, invocation: &ToolInvocation, name: &str) -> ToolResult<String>;

    /// Read every output value.
    async fn outputs(&self, invocation: &ToolInvocation) -> ToolResult<HashMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str, exit_code: i64) -> CommandOutput {
        let now = Utc::now();
        CommandOutput {
            command: "terraform apply".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(output("out", "", 0).combined_output(), "out");
        assert_eq!(output("", "err", 1).combined_output(), "err");
        assert_eq!(output("out", "err", 1).combined_output(), "out\nerr");
    }

    #[test]
    fn test_success() {
        assert!(output("", "", 0).success());
        assert!(!output("", "", 2).success());
    }
}
