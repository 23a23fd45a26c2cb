//! Tool invocation configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default per-command timeout: 30 minutes.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30 * 60;

/// Everything the tool needs to run one lifecycle command against a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Module directory the tool runs in
    pub working_dir: PathBuf,
    /// Input variables, passed as `-var name=value`
    pub vars: BTreeMap<String, serde_json::Value>,
    /// Variable files, passed as `-var-file`
    pub var_files: Vec<PathBuf>,
    /// Backend settings, passed to init as `-backend-config`
    pub backend_config: BTreeMap<String, String>,
    /// Environment variables set on the child process
    pub env: BTreeMap<String, String>,
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
}

impl ToolInvocation {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            backend_config: BTreeMap::new(),
            env: BTreeMap::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn backend_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_config.insert(key.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// `-var` and `-var-file` arguments for apply and destroy.
    pub fn var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.vars.len() * 2 + self.var_files.len() * 2);
        for (name, value) in &self.vars {
            args.push("-var".to_string());
            args.push(format!("{}={}", name, format_var_value(value)));
        }
        for file in &self.var_files {
            args.push("-var-file".to_string());
            args.push(file.to_string_lossy().to_string());
        }
        args
    }

    /// `-backend-config` arguments for init.
    pub fn backend_args(&self) -> Vec<String> {
        self.backend_config
            .iter()
            .map(|(key, value)| format!("-backend-config={}={}", key, value))
            .collect()
    }
}

/// Render a variable value the way the tool's `-var` flag expects it.
///
/// Strings pass through raw; lists and maps use JSON syntax, which HCL
/// accepts for collection literals.
pub fn format_var_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_var_args_formatting() {
        let invocation = ToolInvocation::new("/modules/simple")
            .var("bucket_name", "terratest-s3-bucket-abc123")
            .var("versioning", true)
            .var("tags", json!({"Team": "infra"}))
            .var_file("prod.tfvars");

        let args = invocation.var_args();
        assert_eq!(
            args,
            vec![
                "-var",
                "bucket_name=terratest-s3-bucket-abc123",
                "-var",
                r#"tags={"Team":"infra"}"#,
                "-var",
                "versioning=true",
                "-var-file",
                "prod.tfvars",
            ]
        );
    }

    #[test]
    fn test_backend_args() {
        let invocation = ToolInvocation::new("/m")
            .backend_config("bucket", "state-bucket")
            .backend_config("key", "probe.tfstate");
        assert_eq!(
            invocation.backend_args(),
            vec!["-backend-config=bucket=state-bucket", "-backend-config=key=probe.tfstate"]
        );
    }

    #[test]
    fn test_default_timeout() {
        let invocation = ToolInvocation::new("/m");
        assert_eq!(invocation.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(invocation.timeout(0).timeout_seconds, 0);
    }
}
