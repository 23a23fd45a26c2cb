//! # tfprobe_runner
//!
//! IaC tool invocation layer for tfprobe.
//!
//! This crate hides how Terraform (or OpenTofu) is driven behind the
//! [`IacTool`] trait, so the lifecycle harness can run against a real binary
//! or a scripted fake.
//!
//! # Features
//!
//! - **Binary Detection**: Auto-detect `terraform` vs `tofu`
//! - **Streaming Output**: Each output line goes through `tracing` and an optional handler
//! - **Dry-Run Mode**: Log commands without executing them
//! - **Timeouts**: Per-command wall-clock limits
//! - **Mock Tool**: Stateful fake for tests without a cloud account
//!
//! # Example
//!
//! ```rust,no_run
//! use tfprobe_runner::{IacTool, TerraformCli, TerraformCliOptions, ToolInvocation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tool = TerraformCli::new(TerraformCliOptions::default())?;
//!
//!     let invocation = ToolInvocation::new("modules/simple")
//!         .var("bucket_name", "probe-s3-bucket-0abc");
//!
//!     tool.init(&invocation).await?;
//!     tool.apply(&invocation).await?;
//!     println!("bucket: {}", tool.output(&invocation, "bucket_name").await?);
//!     tool.destroy(&invocation).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod mock;
pub mod tool;

pub use cli::{
    IacBinary, LogHandler, LogLine, LogStream, TerraformCli, TerraformCliOptions,
    DEFAULT_INTERRUPT_GRACE_SECONDS,
};
pub use config::{format_var_value, ToolInvocation, DEFAULT_TIMEOUT_SECONDS};
pub use error::{ToolError, ToolResult};
pub use mock::{CapturedCall, MockTool};
pub use tool::{CommandOutput, IacTool};
