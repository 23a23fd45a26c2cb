//! Error types for the lifecycle harness.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tfprobe_runner::ToolError;

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Lifecycle phase an error or report entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Configure,
    Init,
    Apply,
    Output,
    Verify,
    Destroy,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Configure => "configure",
            Phase::Init => "init",
            Phase::Apply => "apply",
            Phase::Output => "output",
            Phase::Verify => "verify",
            Phase::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while driving a provisioning lifecycle.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{phase} failed after {attempts} attempt(s): {source}")]
    Provisioning {
        phase: Phase,
        attempts: u32,
        #[source]
        source: ToolError,
    },

    #[error("Output not found: {name}")]
    OutputNotFound { name: String },

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Scenario cancelled during {0}")]
    Cancelled(Phase),

    #[error("Scenario timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    /// Whether this error came from the external tool.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, HarnessError::Provisioning { .. } | HarnessError::Tool(_))
    }
}

/// Errors from resource verification. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("{kind} '{id}' not found in {region}")]
    Absent {
        kind: String,
        region: String,
        id: String,
    },

    #[error("{kind} '{id}' is ambiguous in {region}: {count} matches")]
    Ambiguous {
        kind: String,
        region: String,
        id: String,
        count: usize,
    },

    #[error("Provider unreachable while describing {kind} '{id}': {message}")]
    Unreachable {
        kind: String,
        id: String,
        message: String,
    },

    #[error("{kind} '{id}' property '{key}' is {actual:?}, expected '{expected}'")]
    PropertyMismatch {
        kind: String,
        id: String,
        key: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Unsupported resource kind: {0}")]
    UnsupportedKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_error_carries_underlying_failure() {
        let err = HarnessError::Provisioning {
            phase: Phase::Apply,
            attempts: 3,
            source: ToolError::Timeout(60),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("apply failed after 3 attempt(s)"));
        assert!(msg.contains("timed out after 60 seconds"));
        assert!(err.is_tool_failure());
    }

    #[test]
    fn test_verification_error_display() {
        let err = HarnessError::from(VerificationError::Absent {
            kind: "s3-bucket".to_string(),
            region: "us-east-1".to_string(),
            id: "probe-abc".to_string(),
        });
        assert_eq!(err.to_string(), "s3-bucket 'probe-abc' not found in us-east-1");
        assert!(!err.is_tool_failure());
    }
}
