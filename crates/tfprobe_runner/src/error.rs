//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that can occur while driving the IaC tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("IaC tool not available: {0}")]
    NotAvailable(String),

    #[error("Failed to spawn {binary}: {message}")]
    Spawn { binary: String, message: String },

    #[error("`{command}` exited with code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("Output not found: {0}")]
    OutputNotFound(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Malformed tool output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Text the retry classifier matches patterns against.
    ///
    /// For failed commands this is the full captured output, not just the
    /// last line shown in the `Display` form.
    pub fn failure_text(&self) -> String {
        match self {
            ToolError::CommandFailed { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_text_uses_full_output() {
        let err = ToolError::CommandFailed {
            command: "terraform apply".to_string(),
            exit_code: 1,
            output: "line one\nError: read: connection reset by peer".to_string(),
        };
        assert!(err.failure_text().contains("connection reset by peer"));
        assert!(err.failure_text().starts_with("line one"));
    }

    #[test]
    fn test_failure_text_falls_back_to_display() {
        let err = ToolError::Timeout(30);
        assert_eq!(err.failure_text(), "Command timed out after 30 seconds");
    }
}
