//! Scenario orchestration: provision, verify, and always tear down.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use tfprobe_runner::DEFAULT_TIMEOUT_SECONDS;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::driver::LifecycleDriver;
use crate::error::{HarnessError, HarnessResult, Phase};
use crate::identifier::RunIdentifier;
use crate::options::LifecycleOptions;
use crate::retry::RetryPolicy;
use crate::verifier::StateVerifier;

/// Placeholder replaced by the run identifier in string variable values.
pub const RUN_ID_PLACEHOLDER: &str = "${run_id}";

/// One resource to check after apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCheck {
    /// Provider resource kind, e.g. `s3-bucket`
    pub kind: String,
    /// Module output holding the resource identifier
    pub output: String,
    /// Overrides the scenario region
    #[serde(default)]
    pub region: Option<String>,
    /// Expected properties; empty means an existence check only
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ResourceCheck {
    pub fn exists(kind: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            output: output.into(),
            region: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Everything needed to run one provisioning test.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub prefix: String,
    pub module_dir: PathBuf,
    /// Input variable that receives the run identifier
    pub identifier_variable: Option<String>,
    pub variables: BTreeMap<String, Value>,
    pub var_files: Vec<PathBuf>,
    pub backend_config: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub region: String,
    pub retry_policy: RetryPolicy,
    /// Per tool command
    pub command_timeout: Duration,
    /// For the whole scenario, cleanup excluded
    pub timeout: Option<Duration>,
    pub checks: Vec<ResourceCheck>,
    /// Reuse an existing identifier instead of generating one
    pub identifier: Option<RunIdentifier>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prefix: "tfprobe".to_string(),
            module_dir: module_dir.into(),
            identifier_variable: None,
            variables: BTreeMap::new(),
            var_files: Vec::new(),
            backend_config: BTreeMap::new(),
            env: BTreeMap::new(),
            region: "us-east-1".to_string(),
            retry_policy: RetryPolicy::default_retryable_errors(),
            command_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            timeout: None,
            checks: Vec::new(),
            identifier: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_identifier_variable(mut self, name: impl Into<String>) -> Self {
        self.identifier_variable = Some(name.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
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
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_check(mut self, check: ResourceCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_identifier(mut self, identifier: RunIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// The pinned identifier, or a fresh one.
    pub fn resolve_identifier(&self) -> HarnessResult<RunIdentifier> {
        match &self.identifier {
            Some(id) => Ok(id.clone()),
            None => RunIdentifier::generate(&self.prefix),
        }
    }

    /// Lifecycle options for one run under `identifier`.
    pub fn options(&self, identifier: &RunIdentifier) -> HarnessResult<LifecycleOptions> {
        let mut builder = LifecycleOptions::builder(&self.module_dir)
            .with_retry_policy(self.retry_policy.clone())
            .with_command_timeout(self.command_timeout);

        for (name, value) in &self.variables {
            builder = builder.with_var(name.clone(), substitute_run_id(value, identifier));
        }
        if let Some(name) = &self.identifier_variable {
            builder = builder.with_var(name.clone(), identifier.as_str());
        }
        for path in &self.var_files {
            builder = builder.with_var_file(path.clone());
        }
        for (key, value) in &self.backend_config {
            let value = value.replace(RUN_ID_PLACEHOLDER, identifier.as_str());
            builder = builder.with_backend_config(key.clone(), value);
        }
        for (key, value) in &self.env {
            builder = builder.with_env(key.clone(), value.clone());
        }

        builder.build()
    }
}

fn substitute_run_id(value: &Value, identifier: &RunIdentifier) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(RUN_ID_PLACEHOLDER, identifier.as_str())),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_run_id(item, identifier))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_run_id(v, identifier)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Lifecycle states a scenario moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Created,
    Initialized,
    Applied,
    Verified,
    VerificationFailed,
    Destroyed,
    Done,
}

/// Overall outcome of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Every phase succeeded, cleanup included
    Passed,
    /// Provisioning, verification or cleanup failed
    Failed,
    /// Bad configuration, cancellation or timeout
    Errored,
}

/// A failure attributed to one lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub phase: Phase,
    pub identifier: Option<String>,
    pub message: String,
}

/// What happened during one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub identifier: Option<RunIdentifier>,
    pub status: ScenarioStatus,
    pub states: Vec<ScenarioState>,
    pub outputs: HashMap<String, String>,
    pub apply_attempts: u32,
    /// First failure of the scenario body
    pub failure: Option<PhaseFailure>,
    /// Destroy failure, kept apart from `failure`
    pub cleanup_failure: Option<PhaseFailure>,
    pub destroy_attempted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(skip)]
    phase: Phase,
    #[serde(skip)]
    errored: bool,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: None,
            status: ScenarioStatus::Passed,
            states: vec![ScenarioState::Created],
            outputs: HashMap::new(),
            apply_attempts: 0,
            failure: None,
            cleanup_failure: None,
            destroy_attempted: false,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            phase: Phase::Configure,
            errored: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    pub fn state(&self) -> ScenarioState {
        self.states
            .last()
            .copied()
            .unwrap_or(ScenarioState::Created)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(phase = %phase, "Entering phase");
        self.phase = phase;
    }

    fn transition(&mut self, state: ScenarioState) {
        self.states.push(state);
    }

    fn phase_failure(&self, phase: Phase, error: &HarnessError) -> PhaseFailure {
        PhaseFailure {
            phase,
            identifier: self.identifier.as_ref().map(|id| id.to_string()),
            message: error.to_string(),
        }
    }

    /// Record the first failure; later ones are logged only.
    fn fail(&mut self, error: HarnessError) {
        let phase = self.phase;
        if self.failure.is_some() {
            warn!(phase = %phase, "Additional failure: {}", error);
            return;
        }
        error!(phase = %phase, "Scenario failed: {}", error);
        self.errored = matches!(
            error,
            HarnessError::Configuration(_) | HarnessError::Cancelled(_) | HarnessError::Timeout(_)
        );
        self.failure = Some(self.phase_failure(phase, &error));
    }

    fn fail_cleanup(&mut self, error: HarnessError) {
        error!("Cleanup failed, resources may be orphaned: {}", error);
        self.cleanup_failure = Some(self.phase_failure(Phase::Destroy, &error));
    }

    fn finish(mut self) -> Self {
        self.transition(ScenarioState::Done);
        let finished = Utc::now();
        self.duration_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);
        self.status = if self.errored {
            ScenarioStatus::Errored
        } else if self.failure.is_some() || self.cleanup_failure.is_some() {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };
        self
    }
}

/// Destroys a module unless explicitly released.
///
/// Armed once init succeeds. [`CleanupGuard::release`] runs destroy; if the
/// guard is dropped while still armed, a best-effort destroy is spawned on
/// the current runtime.
pub struct CleanupGuard {
    driver: LifecycleDriver,
    options: LifecycleOptions,
    identifier: RunIdentifier,
    armed: bool,
}

impl CleanupGuard {
    pub fn arm(driver: LifecycleDriver, options: LifecycleOptions, identifier: RunIdentifier) -> Self {
        debug!(run_id = %identifier, "Cleanup armed");
        Self {
            driver,
            options,
            identifier,
            armed: true,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Run destroy and disarm.
    pub async fn release(mut self) -> HarnessResult<()> {
        let result = self.driver.destroy(&self.options).await;
        self.armed = false;
        result
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        error!(
            run_id = %self.identifier,
            "Cleanup guard dropped while armed, scheduling best-effort destroy"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let driver = self.driver.clone();
                let options = self.options.clone();
                let identifier = self.identifier.clone();
                handle.spawn(async move {
                    if let Err(e) = driver.destroy(&options).await {
                        error!(run_id = %identifier, "Best-effort destroy failed: {}", e);
                    }
                });
            }
            Err(_) => {
                error!(
                    run_id = %self.identifier,
                    "No runtime available for cleanup, resources may be orphaned"
                );
            }
        }
    }
}

/// Runs scenarios against a driver and a verifier.
#[derive(Clone)]
pub struct ScenarioRunner {
    driver: LifecycleDriver,
    verifier: StateVerifier,
}

impl ScenarioRunner {
    pub fn new(driver: LifecycleDriver, verifier: StateVerifier) -> Self {
        Self { driver, verifier }
    }

    pub fn driver(&self) -> &LifecycleDriver {
        &self.driver
    }

    /// Run one scenario to completion.
    ///
    /// Never returns early past a successful init without running destroy:
    /// failure, timeout and cancellation all fall through to cleanup. A tool
    /// command already running when the timeout or cancellation arrives is
    /// left to finish first, so destroy sees everything it created.
    pub async fn run(&self, scenario: &Scenario, cancel: CancelSignal) -> ScenarioReport {
        let span = info_span!(
            "scenario",
            scenario = %scenario.name,
            run_id = tracing::field::Empty
        );
        self.run_inner(scenario, cancel).instrument(span).await
    }

    async fn run_inner(&self, scenario: &Scenario, cancel: CancelSignal) -> ScenarioReport {
        let mut report = ScenarioReport::new(&scenario.name);

        let identifier = match scenario.resolve_identifier() {
            Ok(id) => id,
            Err(e) => {
                report.fail(e);
                return report.finish();
            }
        };
        Span::current().record("run_id", identifier.as_str());
        report.identifier = Some(identifier.clone());

        let options = match scenario.options(&identifier) {
            Ok(options) => options,
            Err(e) => {
                report.fail(e);
                return report.finish();
            }
        };

        info!("Starting scenario");
        let deadline = scenario.timeout.map(|t| Instant::now() + t);
        let timeout_secs = scenario.timeout.map(|t| t.as_secs()).unwrap_or_default();
        let (stop_handle, stop) = CancelSignal::pair();
        let driver = self.driver.with_stop(stop.clone());

        report.enter(Phase::Init);
        if cancel.is_cancelled() {
            report.fail(HarnessError::Cancelled(Phase::Init));
            return report.finish();
        }
        let init = guarded(
            driver.initialize(&options),
            deadline,
            timeout_secs,
            &cancel,
            &stop_handle,
            || Phase::Init,
        )
        .await;
        if let Err(e) = init {
            // Nothing can exist yet, so there is nothing to destroy.
            report.fail(e);
            return report.finish();
        }
        report.transition(ScenarioState::Initialized);

        let guard = CleanupGuard::arm(self.driver.clone(), options.clone(), identifier.clone());

        let shared = Mutex::new(report);
        let body = self.provision_and_verify(&driver, &stop, scenario, &options, &shared);
        let outcome = guarded(
            body,
            deadline,
            timeout_secs,
            &cancel,
            &stop_handle,
            || shared.lock().phase,
        )
        .await;
        let mut report = shared.into_inner();
        if let Err(e) = outcome {
            report.fail(e);
        }

        report.enter(Phase::Destroy);
        report.destroy_attempted = true;
        match guard.release().await {
            Ok(()) => report.transition(ScenarioState::Destroyed),
            Err(e) => report.fail_cleanup(e),
        }

        let report = report.finish();
        info!(status = ?report.status, duration_ms = report.duration_ms, "Scenario finished");
        report
    }

    async fn provision_and_verify(
        &self,
        driver: &LifecycleDriver,
        stop: &CancelSignal,
        scenario: &Scenario,
        options: &LifecycleOptions,
        report: &Mutex<ScenarioReport>,
    ) -> HarnessResult<()> {
        checkpoint(stop, Phase::Apply)?;
        report.lock().enter(Phase::Apply);
        let applied = driver.apply(options).await?;
        {
            let mut report = report.lock();
            report.apply_attempts = applied.attempts;
            report.outputs = applied.outputs;
            report.transition(ScenarioState::Applied);
        }

        let verified = self.verify(driver, stop, scenario, options, report).await;
        if verified.is_err() && stop.is_cancelled() {
            return verified;
        }
        let state = if verified.is_ok() {
            ScenarioState::Verified
        } else {
            ScenarioState::VerificationFailed
        };
        report.lock().transition(state);
        verified
    }

    async fn verify(
        &self,
        driver: &LifecycleDriver,
        stop: &CancelSignal,
        scenario: &Scenario,
        options: &LifecycleOptions,
        report: &Mutex<ScenarioReport>,
    ) -> HarnessResult<()> {
        for check in &scenario.checks {
            checkpoint(stop, Phase::Output)?;
            report.lock().enter(Phase::Output);
            let id = driver.output(options, &check.output).await?;

            report.lock().enter(Phase::Verify);
            let region = check.region.as_deref().unwrap_or(&scenario.region);
            if check.properties.is_empty() {
                self.verifier.assert_exists(&check.kind, region, &id).await?;
            } else {
                self.verifier
                    .assert_properties(&check.kind, region, &id, &check.properties)
                    .await?;
            }
            info!(kind = %check.kind, id = %id, region, "Resource verified");
        }
        Ok(())
    }
}

/// Run `fut` until it finishes, the deadline passes or cancellation trips.
///
/// On interruption `stop` is tripped and `fut` is still driven to its end,
/// so the tool command in flight completes and records its state while
/// nothing new is started. The interruption is returned in place of the
/// result of `fut`.
async fn guarded<T, F>(
    fut: F,
    deadline: Option<Instant>,
    timeout_secs: u64,
    cancel: &CancelSignal,
    stop: &CancelHandle,
    current_phase: impl Fn() -> Phase,
) -> HarnessResult<T>
where
    F: Future<Output = HarnessResult<T>>,
{
    tokio::pin!(fut);
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupted = tokio::select! {
        biased;
        _ = cancel.cancelled() => HarnessError::Cancelled(current_phase()),
        _ = expired => HarnessError::Timeout(timeout_secs),
        result = &mut fut => return result,
    };

    warn!("{}; waiting for the running command to finish", interrupted);
    stop.cancel();
    if let Err(e) = fut.await {
        debug!("Interrupted work stopped: {}", e);
    }
    Err(interrupted)
}

/// Fails once `stop` has tripped, before `phase` starts any new work.
fn checkpoint(stop: &CancelSignal, phase: Phase) -> HarnessResult<()> {
    if stop.is_cancelled() {
        Err(HarnessError::Cancelled(phase))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{MockProvider, ResourceDescription};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tfprobe_runner::MockTool;

    fn module() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "variable \"bucket_name\" {}\n").unwrap();
        dir
    }

    fn runner(tool: &MockTool, provider: &MockProvider) -> ScenarioRunner {
        ScenarioRunner::new(
            LifecycleDriver::new(Arc::new(tool.clone())),
            StateVerifier::new(Arc::new(provider.clone())),
        )
    }

    #[test]
    fn test_options_substitute_run_id() {
        let id = RunIdentifier::parse("probe-0123456789abcdef").unwrap();
        let scenario = Scenario::new("s3", "modules/s3")
            .with_identifier_variable("bucket_name")
            .with_var("tags", serde_json::json!({"Name": "bucket-${run_id}"}))
            .with_var("count", 2)
            .with_backend_config("key", "${run_id}.tfstate");

        let options = scenario.options(&id).unwrap();
        assert_eq!(
            options.variable("bucket_name"),
            Some(&Value::from("probe-0123456789abcdef"))
        );
        assert_eq!(
            options.variable("tags"),
            Some(&serde_json::json!({"Name": "bucket-probe-0123456789abcdef"}))
        );
        assert_eq!(options.variable("count"), Some(&Value::from(2)));
        assert_eq!(
            options.invocation().backend_config.get("key").map(String::as_str),
            Some("probe-0123456789abcdef.tfstate")
        );
    }

    #[test]
    fn test_resolve_identifier_uses_prefix() {
        let scenario = Scenario::new("s3", "m").with_prefix("bucket");
        let id = scenario.resolve_identifier().unwrap();
        assert_eq!(id.prefix(), "bucket");

        let pinned = RunIdentifier::parse("bucket-aaaaaaaaaaaaaaaa").unwrap();
        let scenario = scenario.with_identifier(pinned.clone());
        assert_eq!(scenario.resolve_identifier().unwrap(), pinned);
    }

    #[tokio::test]
    async fn test_passing_scenario_states() {
        let dir = module();
        let tool = MockTool::new();
        let provider = MockProvider::new();
        let id = RunIdentifier::parse("probe-0000000000000001").unwrap();
        provider.insert("s3-bucket", "us-east-1", ResourceDescription::new(id.as_str()));

        let scenario = Scenario::new("s3", dir.path())
            .with_identifier(id)
            .with_identifier_variable("bucket_name")
            .with_retry_policy(RetryPolicy::none())
            .with_check(ResourceCheck::exists("s3-bucket", "bucket_name"));

        let report = runner(&tool, &provider)
            .run(&scenario, CancelSignal::never())
            .await;

        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(
            report.states,
            vec![
                ScenarioState::Created,
                ScenarioState::Initialized,
                ScenarioState::Applied,
                ScenarioState::Verified,
                ScenarioState::Destroyed,
                ScenarioState::Done,
            ]
        );
        assert_eq!(tool.call_count("destroy"), 1);
    }

    #[tokio::test]
    async fn test_invalid_prefix_never_touches_tool() {
        let dir = module();
        let tool = MockTool::new();
        let scenario = Scenario::new("bad", dir.path()).with_prefix("Not Valid");

        let report = runner(&tool, &MockProvider::new())
            .run(&scenario, CancelSignal::never())
            .await;

        assert_eq!(report.status, ScenarioStatus::Errored);
        assert_eq!(report.failure.unwrap().phase, Phase::Configure);
        assert!(tool.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_touches_tool() {
        let dir = module();
        let tool = MockTool::new();
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let report = runner(&tool, &MockProvider::new())
            .run(&Scenario::new("s3", dir.path()), signal)
            .await;

        assert_eq!(report.status, ScenarioStatus::Errored);
        assert_eq!(report.failure.as_ref().unwrap().phase, Phase::Init);
        assert!(tool.get_calls().is_empty());
        assert!(!report.destroy_attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_drains_interrupted_work() {
        let (cancel_handle, cancel) = CancelSignal::pair();
        let (stop_handle, stop) = CancelSignal::pair();
        let finished = Arc::new(parking_lot::Mutex::new(false));
        let done = finished.clone();

        cancel_handle.cancel();
        let work = async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            *done.lock() = stop.is_cancelled();
            Ok(())
        };
        let result: HarnessResult<()> =
            guarded(work, None, 0, &cancel, &stop_handle, || Phase::Apply).await;

        assert!(matches!(result, Err(HarnessError::Cancelled(Phase::Apply))));
        assert!(*finished.lock());
    }

    #[tokio::test]
    async fn test_destroy_failure_is_separate() {
        let dir = module();
        let tool = MockTool::new().fail_always("destroy", "Error: DependencyViolation");
        let scenario = Scenario::new("s3", dir.path()).with_retry_policy(RetryPolicy::none());

        let report = runner(&tool, &MockProvider::new())
            .run(&scenario, CancelSignal::never())
            .await;

        assert_eq!(report.status, ScenarioStatus::Failed);
        assert!(report.failure.is_none());
        let cleanup = report.cleanup_failure.unwrap();
        assert_eq!(cleanup.phase, Phase::Destroy);
        assert!(cleanup.message.contains("DependencyViolation"));
        assert_eq!(report.states.last(), Some(&ScenarioState::Done));
        assert!(!report.states.contains(&ScenarioState::Destroyed));
    }

    #[tokio::test]
    async fn test_dropped_guard_schedules_destroy() {
        let dir = module();
        let tool = MockTool::new();
        let driver = LifecycleDriver::new(Arc::new(tool.clone()));
        let options = LifecycleOptions::builder(dir.path()).build().unwrap();
        let id = RunIdentifier::parse("probe-0000000000000002").unwrap();

        let guard = CleanupGuard::arm(driver, options, id);
        assert!(guard.is_armed());
        drop(guard);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(tool.call_count("destroy"), 1);
    }

    #[tokio::test]
    async fn test_released_guard_destroys_once() {
        let dir = module();
        let tool = MockTool::new();
        let driver = LifecycleDriver::new(Arc::new(tool.clone()));
        let options = LifecycleOptions::builder(dir.path()).build().unwrap();
        let id = RunIdentifier::parse("probe-0000000000000003").unwrap();

        CleanupGuard::arm(driver, options, id).release().await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(tool.call_count("destroy"), 1);
    }
}
