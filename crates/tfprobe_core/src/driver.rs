//! Lifecycle driver: init, apply, output and destroy against the IaC tool.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tfprobe_runner::{IacTool, ToolError};

use crate::cancel::CancelSignal;
use crate::error::{HarnessError, HarnessResult, Phase};
use crate::options::LifecycleOptions;
use crate::retry::{run_with_retry, run_with_retry_until};

/// Outcome of a successful apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Outputs reported by the tool after apply.
    pub outputs: HashMap<String, String>,
    pub success: bool,
    /// How many attempts apply took.
    pub attempts: u32,
}

/// Drives one module through its lifecycle, retrying transient failures.
#[derive(Clone)]
pub struct LifecycleDriver {
    tool: Arc<dyn IacTool>,
    /// Once tripped, init and apply start no further attempts
    stop: CancelSignal,
}

impl LifecycleDriver {
    pub fn new(tool: Arc<dyn IacTool>) -> Self {
        Self {
            tool,
            stop: CancelSignal::never(),
        }
    }

    /// A driver whose init and apply stop retrying once `stop` trips.
    ///
    /// Destroy ignores `stop` and always runs its full retry schedule.
    pub fn with_stop(&self, stop: CancelSignal) -> Self {
        Self {
            tool: self.tool.clone(),
            stop,
        }
    }

    pub fn tool(&self) -> &Arc<dyn IacTool> {
        &self.tool
    }

    /// Prepare the module directory. Safe to call more than once.
    pub async fn initialize(&self, options: &LifecycleOptions) -> HarnessResult<()> {
        ensure_module_dir(options.module_dir())?;
        info!("Initializing module {:?}", options.module_dir());

        let invocation = &options.invocation();
        let tool = &self.tool;
        let result = run_with_retry_until(options.retry_policy(), Phase::Init, &self.stop, |_| {
            tool.init(invocation)
        })
        .await?;

        debug!(attempts = result.attempts, "Module initialized");
        Ok(())
    }

    /// Provision the module's resources and collect its outputs.
    pub async fn apply(&self, options: &LifecycleOptions) -> HarnessResult<ApplyResult> {
        info!("Applying module {:?}", options.module_dir());

        let invocation = &options.invocation();
        let tool = &self.tool;
        let result = run_with_retry_until(options.retry_policy(), Phase::Apply, &self.stop, |_| {
            tool.apply(invocation)
        })
        .await?;

        let outputs = tool.outputs(invocation).await?;
        info!(
            attempts = result.attempts,
            outputs = outputs.len(),
            "Apply complete"
        );

        Ok(ApplyResult {
            outputs,
            success: true,
            attempts: result.attempts,
        })
    }

    /// Read one output of the last successful apply.
    pub async fn output(&self, options: &LifecycleOptions, name: &str) -> HarnessResult<String> {
        match self.tool.output(&options.invocation(), name).await {
            Ok(value) => {
                debug!(output = name, "Read output");
                Ok(value)
            }
            Err(ToolError::OutputNotFound(name)) => Err(HarnessError::OutputNotFound { name }),
            Err(e) => Err(HarnessError::Tool(e)),
        }
    }

    /// Tear down everything the module's state tracks.
    ///
    /// When nothing was ever created this is a no-op at the tool level, so
    /// it is safe on every exit path and safe to repeat.
    pub async fn destroy(&self, options: &LifecycleOptions) -> HarnessResult<()> {
        info!("Destroying module {:?}", options.module_dir());

        let invocation = &options.invocation();
        let tool = &self.tool;
        let result = run_with_retry(options.retry_policy(), Phase::Destroy, |_| {
            tool.destroy(invocation)
        })
        .await;

        match result {
            Ok(done) => {
                info!(attempts = done.attempts, "Destroy complete");
                Ok(())
            }
            Err(e) => {
                warn!("Destroy failed: {}", e);
                Err(e)
            }
        }
    }
}

/// The module directory must exist and hold at least one configuration file.
fn ensure_module_dir(dir: &Path) -> HarnessResult<()> {
    if !dir.is_dir() {
        return Err(HarnessError::Configuration(format!(
            "module directory {:?} does not exist",
            dir
        )));
    }

    let has_config = fs::read_dir(dir)?.filter_map(Result::ok).any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.ends_with(".tf") || name.ends_with(".tf.json")
    });

    if has_config {
        Ok(())
    } else {
        Err(HarnessError::Configuration(format!(
            "module directory {:?} contains no .tf or .tf.json files",
            dir
        )))
    }
}
