//! # tfprobe_core
//!
//! Provisioning lifecycle harness for infrastructure modules.
//!
//! A [`Scenario`] drives one module through init, apply, verify and destroy.
//! Destroy runs on every exit path once init has succeeded, including
//! failed applies, failed verification, timeouts and cancellation.
//!
//! ## Features
//!
//! - Collision-resistant, provider-legal run identifiers
//! - Retry policies for known transient tool failures
//! - Live-state verification through a pluggable resource provider
//! - Suites of serial and parallel scenarios, loadable from YAML
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tfprobe_core::{
//!     AwsCliProvider, CancelSignal, LifecycleDriver, ResourceCheck, Scenario, ScenarioRunner,
//!     StateVerifier,
//! };
//! use tfprobe_runner::{TerraformCli, TerraformCliOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tool = TerraformCli::new(TerraformCliOptions::default())?;
//! let runner = ScenarioRunner::new(
//!     LifecycleDriver::new(Arc::new(tool)),
//!     StateVerifier::new(Arc::new(AwsCliProvider::new())),
//! );
//!
//! let scenario = Scenario::new("simple-bucket", "modules/simple")
//!     .with_prefix("terratest-s3")
//!     .with_identifier_variable("bucket_name")
//!     .with_check(ResourceCheck::exists("s3-bucket", "bucket_name"));
//!
//! let report = runner.run(&scenario, CancelSignal::never()).await;
//! assert!(report.passed());
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod identifier;
pub mod options;
pub mod retry;
pub mod scenario;
pub mod suite;
pub mod verifier;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::{RetryConfig, RetryPreset, RetryRuleConfig, ScenarioConfig, ScenarioOverrides, SuiteFile};
pub use driver::{ApplyResult, LifecycleDriver};
pub use error::{HarnessError, HarnessResult, Phase, VerificationError};
pub use identifier::{RunIdentifier, MAX_IDENTIFIER_LEN};
pub use options::{LifecycleOptions, LifecycleOptionsBuilder};
pub use retry::{run_with_retry, run_with_retry_until, Backoff, Retried, RetryPolicy, RetryRule};
pub use scenario::{
    CleanupGuard, PhaseFailure, ResourceCheck, Scenario, ScenarioReport, ScenarioRunner,
    ScenarioState, ScenarioStatus,
};
pub use suite::{ScenarioSuite, SuiteEntry, SuiteReport, SuiteSummary};
pub use verifier::{
    AwsCliProvider, MockProvider, ProviderError, ResourceDescription, ResourceProvider,
    StateVerifier,
};
