//! Lifecycle options: what module to run, with which inputs, under which retry policy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tfprobe_runner::{ToolInvocation, DEFAULT_TIMEOUT_SECONDS};

use crate::error::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;

/// Immutable per-scenario configuration for one provisioning lifecycle.
///
/// Credentials and other ambient settings are carried in `env_vars` rather
/// than read from the process environment, so parallel scenarios never
/// observe each other's settings.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    module_dir: PathBuf,
    variables: BTreeMap<String, serde_json::Value>,
    var_files: Vec<PathBuf>,
    backend_config: BTreeMap<String, String>,
    env_vars: BTreeMap<String, String>,
    retry_policy: RetryPolicy,
    command_timeout: Duration,
}

impl LifecycleOptions {
    /// Build options from the three required parts.
    ///
    /// The module directory is not checked for existence here; the driver
    /// does that when it initializes.
    pub fn build(
        module_dir: impl Into<PathBuf>,
        variables: impl IntoIterator<Item = (String, serde_json::Value)>,
        retry_policy: RetryPolicy,
    ) -> HarnessResult<Self> {
        let mut builder = Self::builder(module_dir).with_retry_policy(retry_policy);
        for (name, value) in variables {
            builder = builder.with_var(name, value);
        }
        builder.build()
    }

    pub fn builder(module_dir: impl Into<PathBuf>) -> LifecycleOptionsBuilder {
        LifecycleOptionsBuilder::new(module_dir)
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn variables(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    pub fn var_files(&self) -> &[PathBuf] {
        &self.var_files
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// The tool-level invocation these options describe.
    pub fn invocation(&self) -> ToolInvocation {
        let mut invocation =
            ToolInvocation::new(&self.module_dir).timeout(self.command_timeout.as_secs());
        invocation.vars = self.variables.clone();
        invocation.var_files = self.var_files.clone();
        invocation.backend_config = self.backend_config.clone();
        invocation.env = self.env_vars.clone();
        invocation
    }
}

/// Builder for [`LifecycleOptions`].
#[derive(Debug, Clone)]
pub struct LifecycleOptionsBuilder {
    module_dir: PathBuf,
    variables: BTreeMap<String, serde_json::Value>,
    var_files: Vec<PathBuf>,
    backend_config: BTreeMap<String, String>,
    env_vars: BTreeMap<String, String>,
    retry_policy: RetryPolicy,
    command_timeout: Duration,
    invalid_keys: Vec<String>,
}

impl LifecycleOptionsBuilder {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            variables: BTreeMap::new(),
            var_files: Vec::new(),
            backend_config: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            retry_policy: RetryPolicy::none(),
            command_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            invalid_keys: Vec::new(),
        }
    }

    /// Add an input variable. A later value for the same name replaces the earlier one.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            self.invalid_keys.push(name);
        } else {
            self.variables.insert(name, value.into());
        }
        self
    }

    pub fn with_var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn with_backend_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_config.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Use the well-known transient Terraform errors as the retry policy.
    pub fn with_default_retryable_errors(self) -> Self {
        self.with_retry_policy(RetryPolicy::default_retryable_errors())
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn build(self) -> HarnessResult<LifecycleOptions> {
        if self.module_dir.as_os_str().is_empty() {
            return Err(HarnessError::Configuration(
                "module directory must not be empty".to_string(),
            ));
        }
        if !self.invalid_keys.is_empty() {
            return Err(HarnessError::Configuration(
                "variable names must be non-empty".to_string(),
            ));
        }
        if let Some(key) = self.env_vars.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(HarnessError::Configuration(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }

        Ok(LifecycleOptions {
            module_dir: self.module_dir,
            variables: self.variables,
            var_files: self.var_files,
            backend_config: self.backend_config,
            env_vars: self.env_vars,
            retry_policy: self.retry_policy,
            command_timeout: self.command_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_from_parts() {
        let options = LifecycleOptions::build(
            "examples/simple",
            vec![("bucket_name".to_string(), json!("terratest-s3-bucket-abc123"))],
            RetryPolicy::default_retryable_errors(),
        )
        .unwrap();

        assert_eq!(options.module_dir(), Path::new("examples/simple"));
        assert_eq!(
            options.variable("bucket_name"),
            Some(&json!("terratest-s3-bucket-abc123"))
        );
        assert!(!options.retry_policy().is_empty());
    }

    #[test]
    fn test_empty_module_dir_is_configuration_error() {
        let err = LifecycleOptions::build("", Vec::new(), RetryPolicy::none()).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn test_empty_variable_name_is_rejected() {
        let err = LifecycleOptions::builder("m")
            .with_var("", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn test_values_are_opaque() {
        let options = LifecycleOptions::builder("m")
            .with_var("count", 3)
            .with_var("tags", json!({"team": "infra"}))
            .with_var("enabled", false)
            .build()
            .unwrap();
        assert_eq!(options.variables().len(), 3);
    }

    #[test]
    fn test_invocation_carries_everything() {
        let options = LifecycleOptions::builder("modules/simple")
            .with_var("bucket_name", "probe-1")
            .with_var_file("common.tfvars")
            .with_backend_config("key", "probe.tfstate")
            .with_env("AWS_PROFILE", "sandbox")
            .with_command_timeout(Duration::from_secs(90))
            .build()
            .unwrap();

        let invocation = options.invocation();
        assert_eq!(invocation.working_dir, PathBuf::from("modules/simple"));
        assert_eq!(invocation.vars.get("bucket_name"), Some(&json!("probe-1")));
        assert_eq!(invocation.var_files, vec![PathBuf::from("common.tfvars")]);
        assert_eq!(invocation.backend_config.get("key").map(String::as_str), Some("probe.tfstate"));
        assert_eq!(invocation.env.get("AWS_PROFILE").map(String::as_str), Some("sandbox"));
        assert_eq!(invocation.timeout_seconds, 90);
    }

    #[test]
    fn test_bad_env_name_is_rejected() {
        assert!(LifecycleOptions::builder("m").with_env("A=B", "x").build().is_err());
    }
}
