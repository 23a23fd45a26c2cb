//! Integration tests for the IaC tool layer.
//!
//! Most tests use the mock tool; the process tests drive `TerraformCli`
//! against a small shell script standing in for the terraform binary.

use std::collections::HashMap;

use tfprobe_runner::{
    IacBinary, IacTool, MockTool, TerraformCli, TerraformCliOptions, ToolError, ToolInvocation,
};

fn invocation() -> ToolInvocation {
    ToolInvocation::new("/modules/simple")
        .var("bucket_name", "terratest-s3-bucket-abc123")
        .env("AWS_PROFILE", "sandbox")
}

/// Test a full lifecycle against the mock tool.
#[tokio::test]
async fn test_mock_tool_lifecycle() {
    let tool = MockTool::new();
    let inv = invocation();

    tool.init(&inv).await.unwrap();
    let applied = tool.apply(&inv).await.unwrap();
    assert!(applied.success());

    let outputs = tool.outputs(&inv).await.unwrap();
    assert_eq!(
        outputs.get("bucket_name").map(String::as_str),
        Some("terratest-s3-bucket-abc123")
    );

    tool.destroy(&inv).await.unwrap();
    assert!(tool.deployed_outputs("/modules/simple").is_none());
    assert_eq!(tool.call_sequence(), vec!["init", "apply", "outputs", "destroy"]);
}

/// Test that the mock captures variables and explicit environment.
#[tokio::test]
async fn test_mock_tool_captures_invocation() {
    let tool = MockTool::new();
    tool.apply(&invocation()).await.unwrap();

    let calls = tool.get_calls();
    assert_eq!(calls.len(), 1);

    let call = &calls[0];
    assert_eq!(call.method, "apply");
    assert_eq!(call.working_dir.to_str(), Some("/modules/simple"));
    assert_eq!(
        call.vars.get("bucket_name"),
        Some(&serde_json::json!("terratest-s3-bucket-abc123"))
    );
    assert_eq!(call.env.get("AWS_PROFILE").map(String::as_str), Some("sandbox"));
}

/// Test persistent failure simulation.
#[tokio::test]
async fn test_mock_tool_persistent_failure() {
    let tool = MockTool::new().fail_always("destroy", "Error: AccessDenied");
    tool.apply(&invocation()).await.unwrap();

    for _ in 0..2 {
        match tool.destroy(&invocation()).await {
            Err(ToolError::CommandFailed { output, exit_code, .. }) => {
                assert_eq!(exit_code, 1);
                assert!(output.contains("AccessDenied"));
            }
            other => panic!("Expected CommandFailed, got {:?}", other.map(|o| o.stdout)),
        }
    }
    assert!(tool.has_deployments());
}

#[cfg(unix)]
mod process {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::{Duration, Instant};

    const FAKE_TERRAFORM: &str = r#"#!/bin/sh
case "$1" in
  init)
    echo "Terraform has been successfully initialized!"
    echo "token=$PROBE_TOKEN"
    ;;
  apply)
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed."
    ;;
  output)
    if [ -z "$4" ]; then
      echo '{"bucket_name":{"sensitive":false,"type":"string","value":"probe-abc"},"bucket_count":{"sensitive":false,"type":"number","value":2}}'
    elif [ "$4" = "bucket_name" ]; then
      echo '"probe-abc"'
    else
      echo "Error: Output \"$4\" not found" >&2
      exit 1
    fi
    ;;
  destroy)
    echo "Error: read: connection reset by peer" >&2
    exit 1
    ;;
esac
"#;

    const SLOW_TERRAFORM: &str = "#!/bin/sh\nexec sleep 5\n";

    /// Records the interrupt and exits the way terraform does after a graceful stop.
    const INTERRUPTIBLE_TERRAFORM: &str = r#"#!/bin/sh
trap 'echo interrupted > "$MARKER_FILE"; kill $! 2>/dev/null; exit 130' INT
echo "aws_s3_bucket.bucket: Creating..."
sleep 30 >/dev/null 2>&1 &
wait
"#;

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Drive the CLI tool against a scripted binary.
    #[tokio::test]
    async fn test_cli_tool_against_script() {
        let dir = tempfile::tempdir().unwrap();
        let fake = write_script(dir.path(), "terraform", FAKE_TERRAFORM);
        let slow = write_script(dir.path(), "slow-terraform", SLOW_TERRAFORM);

        let cli = TerraformCli::new(TerraformCliOptions::new().binary_path(&fake)).unwrap();
        assert_eq!(cli.binary(), IacBinary::Terraform);

        let inv = ToolInvocation::new(dir.path()).env("PROBE_TOKEN", "s3cr3t");

        let init = cli.init(&inv).await.unwrap();
        assert!(init.stdout.contains("successfully initialized"));
        assert!(init.stdout.contains("token=s3cr3t"));

        let apply = cli.apply(&inv).await.unwrap();
        assert!(apply.stdout.contains("Apply complete!"));

        assert_eq!(cli.output(&inv, "bucket_name").await.unwrap(), "probe-abc");
        match cli.output(&inv, "bucket_arn").await {
            Err(ToolError::OutputNotFound(name)) => assert_eq!(name, "bucket_arn"),
            other => panic!("Expected OutputNotFound, got {:?}", other),
        }

        let outputs: HashMap<String, String> = cli.outputs(&inv).await.unwrap();
        assert_eq!(outputs.get("bucket_name").map(String::as_str), Some("probe-abc"));
        assert_eq!(outputs.get("bucket_count").map(String::as_str), Some("2"));

        match cli.destroy(&inv).await {
            Err(err @ ToolError::CommandFailed { .. }) => {
                assert!(err.failure_text().contains("connection reset by peer"));
            }
            other => panic!("Expected CommandFailed, got {:?}", other.map(|o| o.stdout)),
        }

        let slow_cli = TerraformCli::new(TerraformCliOptions::new().binary_path(&slow)).unwrap();
        let timed = ToolInvocation::new(dir.path()).timeout(1);
        match slow_cli.apply(&timed).await {
            Err(ToolError::Timeout(secs)) => assert_eq!(secs, 1),
            other => panic!("Expected Timeout, got {:?}", other.map(|o| o.stdout)),
        }
    }

    /// A timed-out command is interrupted and given time to exit cleanly.
    #[tokio::test]
    async fn test_timed_out_command_is_interrupted_not_killed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "terraform", INTERRUPTIBLE_TERRAFORM);
        let marker = dir.path().join("interrupted");

        let cli = TerraformCli::new(
            TerraformCliOptions::new()
                .binary_path(&script)
                .interrupt_grace(Duration::from_secs(10)),
        )
        .unwrap();
        let inv = ToolInvocation::new(dir.path())
            .env("MARKER_FILE", marker.to_string_lossy())
            .timeout(1);

        let started = Instant::now();
        match cli.apply(&inv).await {
            Err(ToolError::Timeout(secs)) => assert_eq!(secs, 1),
            other => panic!("Expected Timeout, got {:?}", other.map(|o| o.stdout)),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "interrupted");
    }

    #[tokio::test]
    async fn test_version_and_availability() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "terraform",
            "#!/bin/sh\necho '{\"terraform_version\":\"1.6.6\"}'\n",
        );
        let cli = TerraformCli::new(TerraformCliOptions::new().binary_path(&script)).unwrap();

        assert!(cli.is_available().await.unwrap());
        assert_eq!(cli.version().await.unwrap(), "terraform 1.6.6");

        let missing =
            TerraformCli::new(TerraformCliOptions::new().binary_path(dir.path().join("nope")))
                .unwrap();
        assert!(!missing.is_available().await.unwrap());
    }

    /// Spawning a missing binary is a spawn error, not a command failure.
    #[tokio::test]
    async fn test_cli_tool_missing_binary() {
        let cli = TerraformCli::new(
            TerraformCliOptions::new().binary_path("/nonexistent/terraform-probe-missing"),
        )
        .unwrap();

        let err = cli.init(&ToolInvocation::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
