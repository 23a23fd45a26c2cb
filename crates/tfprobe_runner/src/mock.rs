//! Mock IaC tool for testing.
//!
//! Provides a stateful fake implementation of the [`IacTool`] trait: apply
//! "deploys" the module (its outputs echo the input variables), destroy
//! removes it, and failures can be scripted per lifecycle method.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{format_var_value, ToolInvocation};
use crate::error::{ToolError, ToolResult};
use crate::tool::{CommandOutput, IacTool};

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub working_dir: PathBuf,
    pub vars: BTreeMap<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
}

/// Mock IaC tool for testing.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and keep another to inspect calls and deployed modules.
#[derive(Clone)]
pub struct MockTool {
    /// Whether the tool should report as available.
    available: Arc<RwLock<bool>>,
    /// Version string to return.
    version: Arc<RwLock<String>>,
    /// One-shot failures per method, consumed in order.
    scripted_failures: Arc<RwLock<HashMap<String, VecDeque<String>>>>,
    /// Failures returned on every call to a method.
    persistent_failures: Arc<RwLock<HashMap<String, String>>>,
    /// Whether a failed apply still leaves resources behind.
    partial_apply: Arc<RwLock<bool>>,
    /// Artificial latency per method.
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Extra outputs every deployment reports.
    static_outputs: Arc<RwLock<HashMap<String, String>>>,
    /// Live deployments keyed by module directory.
    deployed: Arc<RwLock<HashMap<PathBuf, HashMap<String, String>>>>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl Default for MockTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTool {
    /// Create a new mock tool.
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            version: Arc::new(RwLock::new("mock-terraform 1.6.0".to_string())),
            scripted_failures: Arc::new(RwLock::new(HashMap::new())),
            persistent_failures: Arc::new(RwLock::new(HashMap::new())),
            partial_apply: Arc::new(RwLock::new(false)),
            delays: Arc::new(RwLock::new(HashMap::new())),
            static_outputs: Arc::new(RwLock::new(HashMap::new())),
            deployed: Arc::new(RwLock::new(HashMap::new())),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set whether the tool is available.
    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Set the version string.
    pub fn set_version(self, version: impl Into<String>) -> Self {
        *self.version.write() = version.into();
        self
    }

    /// Fail the next call to `method` with `message`.
    ///
    /// Calling this repeatedly queues several failures; each call consumes one.
    pub fn fail_next(self, method: &str, message: impl Into<String>) -> Self {
        self.scripted_failures
            .write()
            .entry(method.to_string())
            .or_default()
            .push_back(message.into());
        self
    }

    /// Fail every call to `method` with `message`.
    pub fn fail_always(self, method: &str, message: impl Into<String>) -> Self {
        self.persistent_failures
            .write()
            .insert(method.to_string(), message.into());
        self
    }

    /// Make failed applies leave the module deployed, as a half-finished apply would.
    pub fn partial_apply(self, enabled: bool) -> Self {
        *self.partial_apply.write() = enabled;
        self
    }

    /// Make every call to `method` take `delay` before it responds.
    pub fn with_delay(self, method: &str, delay: Duration) -> Self {
        self.delays.write().insert(method.to_string(), delay);
        self
    }

    /// Add an output every deployment reports in addition to its variables.
    pub fn with_output(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_outputs.write().insert(name.into(), value.into());
        self
    }

    /// Outputs of the live deployment in `dir`, if any.
    pub fn deployed_outputs(&self, dir: impl Into<PathBuf>) -> Option<HashMap<String, String>> {
        self.deployed.read().get(&dir.into()).cloned()
    }

    /// Whether anything is currently deployed in any module directory.
    pub fn has_deployments(&self) -> bool {
        !self.deployed.read().is_empty()
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Ordered method names of all captured calls.
    pub fn call_sequence(&self) -> Vec<String> {
        self.captured_calls
            .read()
            .iter()
            .map(|c| c.method.clone())
            .collect()
    }

    /// Get the number of calls to a specific method.
    pub fn call_count(&self, method: &str) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    fn record_call(&self, method: &str, invocation: &ToolInvocation) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            working_dir: invocation.working_dir.clone(),
            vars: invocation.vars.clone(),
            env: invocation.env.clone(),
        });
    }

    /// Check for a scripted or persistent failure.
    fn check_failure(&self, method: &str) -> ToolResult<()> {
        let scripted = self
            .scripted_failures
            .write()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        let message = scripted.or_else(|| self.persistent_failures.read().get(method).cloned());

        match message {
            Some(output) => Err(ToolError::CommandFailed {
                command: format!("terraform {}", method),
                exit_code: 1,
                output,
            }),
            None => Ok(()),
        }
    }

    fn deploy(&self, invocation: &ToolInvocation) {
        let mut outputs: HashMap<String, String> = invocation
            .vars
            .iter()
            .map(|(name, value)| (name.clone(), format_var_value(value)))
            .collect();
        outputs.extend(self.static_outputs.read().clone());
        self.deployed
            .write()
            .insert(invocation.working_dir.clone(), outputs);
    }

    async fn pause(&self, method: &str) {
        let delay = self.delays.read().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn ok(method: &str, stdout: impl Into<String>) -> CommandOutput {
        let now = Utc::now();
        CommandOutput {
            command: format!("terraform {}", method),
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }
}

#[async_trait]
impl IacTool for MockTool {
    async fn is_available(&self) -> ToolResult<bool> {
        Ok(*self.available.read())
    }

    async fn version(&self) -> ToolResult<String> {
        Ok(self.version.read().clone())
    }

    async fn init(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        self.record_call("init", invocation);
        self.pause("init").await;
        self.check_failure("init")?;
        Ok(Self::ok("init", "Terraform has been successfully initialized!"))
    }

    async fn apply(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        self.record_call("apply", invocation);
        self.pause("apply").await;
        if let Err(e) = self.check_failure("apply") {
            if *self.partial_apply.read() {
                self.deploy(invocation);
            }
            return Err(e);
        }
        self.deploy(invocation);
        Ok(Self::ok("apply", "Apply complete!"))
    }

    async fn destroy(&self, invocation: &ToolInvocation) -> ToolResult<CommandOutput> {
        self.record_call("destroy", invocation);
        self.pause("destroy").await;
        self.check_failure("destroy")?;
        match self.deployed.write().remove(&invocation.working_dir) {
            Some(_) => Ok(Self::ok("destroy", "Destroy complete!")),
            None => Ok(Self::ok(
                "destroy",
                "No changes. No objects need to be destroyed.",
            )),
        }
    }

    async fn output(&self, invocation: &ToolInvocation, name: &str) -> ToolResult<String> {
        self.record_call("output", invocation);
        self.check_failure("output")?;
        self.deployed
            .read()
            .get(&invocation.working_dir)
            .and_then(|outputs| outputs.get(name).cloned())
            .ok_or_else(|| ToolError::OutputNotFound(name.to_string()))
    }

    async fn outputs(&self, invocation: &ToolInvocation) -> ToolResult<HashMap<String, String>> {
        self.record_call("outputs", invocation);
        self.check_failure("outputs")?;
        Ok(self
            .deployed
            .read()
            .get(&invocation.working_dir)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> ToolInvocation {
        ToolInvocation::new("/modules/simple").var("bucket_name", "probe-abc123")
    }

    #[tokio::test]
    async fn test_apply_deploys_variables_as_outputs() {
        let tool = MockTool::new().with_output("bucket_arn", "arn:aws:s3:::probe-abc123");

        tool.apply(&invocation()).await.unwrap();

        let outputs = tool.deployed_outputs("/modules/simple").unwrap();
        assert_eq!(outputs.get("bucket_name").map(String::as_str), Some("probe-abc123"));
        assert_eq!(
            tool.output(&invocation(), "bucket_arn").await.unwrap(),
            "arn:aws:s3:::probe-abc123"
        );
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let tool = MockTool::new();
        tool.apply(&invocation()).await.unwrap();

        let first = tool.destroy(&invocation()).await.unwrap();
        assert_eq!(first.stdout, "Destroy complete!");
        assert!(!tool.has_deployments());

        let second = tool.destroy(&invocation()).await.unwrap();
        assert!(second.stdout.contains("No objects need to be destroyed"));
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let tool = MockTool::new()
            .fail_next("apply", "first")
            .fail_next("apply", "second");

        let e1 = tool.apply(&invocation()).await.unwrap_err();
        assert_eq!(e1.failure_text(), "first");
        let e2 = tool.apply(&invocation()).await.unwrap_err();
        assert_eq!(e2.failure_text(), "second");
        assert!(tool.apply(&invocation()).await.is_ok());
        assert_eq!(tool.call_count("apply"), 3);
    }

    #[tokio::test]
    async fn test_failed_apply_deploys_nothing_unless_partial() {
        let tool = MockTool::new().fail_always("apply", "boom");
        assert!(tool.apply(&invocation()).await.is_err());
        assert!(!tool.has_deployments());

        let partial = MockTool::new().fail_always("apply", "boom").partial_apply(true);
        assert!(partial.apply(&invocation()).await.is_err());
        assert!(partial.has_deployments());
    }

    #[tokio::test]
    async fn test_missing_output() {
        let tool = MockTool::new();
        let err = tool.output(&invocation(), "bucket_name").await.unwrap_err();
        assert!(matches!(err, ToolError::OutputNotFound(_)));
    }

    #[tokio::test]
    async fn test_availability() {
        assert!(MockTool::new().is_available().await.unwrap());
        assert!(!MockTool::new().set_available(false).is_available().await.unwrap());
    }
}
