// ABOUTME: Integration tests for the CLI application
// ABOUTME: Tests command-line interface functionality and end-to-end request execution

use std::process::Command;

mod common;
use common::{read_json_output, TestEnvironment, TestRequestBuilder};

fn thunkflow() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_thunkflow"));
    command.env_remove("RUST_LOG").arg("--no-color");
    command
}

#[tokio::test]
async fn test_cli_help_command() {
    let output = thunkflow().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("thunkflow"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("validate"));
}

#[tokio::test]
async fn test_cli_version_command() {
    let output = thunkflow().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_cli_run_prints_summary() {
    let env = TestEnvironment::new();
    let builder = TestRequestBuilder::new("cli_simple").step("hello");
    let request = env.create_request_file("simple", &builder).await;

    let output = thunkflow()
        .current_dir(env.path())
        .args(["run", request.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Workflow 'cli_simple' finished with status: completed"));
    assert!(stdout.contains("Step 'hello'"));
}

#[tokio::test]
async fn test_cli_run_writes_json_output() {
    let env = TestEnvironment::new();
    let builder = TestRequestBuilder::new("cli_output")
        .step("first")
        .step_after("second", &["first"]);
    let request = env.create_request_file("output", &builder).await;
    let output_file = env.output_file("result");

    let output = thunkflow()
        .current_dir(env.path())
        .args([
            "run",
            request.to_str().unwrap(),
            "--mode",
            "parallel",
            "--output",
            output_file.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json = read_json_output(&output_file).await;
    assert_eq!(json["workflow_name"], "cli_output");
    assert_eq!(json["execution_mode"], "parallel");
    assert_eq!(json["steps_completed"], 2);
    assert_eq!(json["waves"], 2);
}

#[tokio::test]
async fn test_cli_run_fails_when_workflow_fails() {
    let env = TestEnvironment::new();
    env.write_file(
        "thunkflow.yaml",
        "engine:\n  strict_dispatch: true\n",
    )
    .await;
    let builder = TestRequestBuilder::new("cli_failure").step("unroutable");
    let request = env.create_request_file("failing", &builder).await;

    let output = thunkflow()
        .current_dir(env.path())
        .args(["run", request.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("did not complete"));
}

#[tokio::test]
async fn test_cli_explicit_config_file() {
    let env = TestEnvironment::new();
    let config = env
        .write_file("custom.yaml", "engine:\n  strict_dispatch: true\n")
        .await;
    let builder = TestRequestBuilder::new("cli_config").step("unroutable");
    let request = env.create_request_file("configured", &builder).await;

    let output = thunkflow()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            request.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[tokio::test]
async fn test_cli_validate_prints_order() {
    let env = TestEnvironment::new();
    let builder = TestRequestBuilder::new("cli_validate")
        .step_after("load", &["transform"])
        .step_after("transform", &["extract"])
        .step("extract");
    let request = env.create_request_file("validate", &builder).await;

    let output = thunkflow()
        .current_dir(env.path())
        .args(["validate", request.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("extract -> transform -> load"));
}

#[tokio::test]
async fn test_cli_validate_rejects_cycle() {
    let env = TestEnvironment::new();
    let builder = TestRequestBuilder::new("cli_cycle")
        .step_after("a", &["b"])
        .step_after("b", &["a"]);
    let request = env.create_request_file("cycle", &builder).await;

    let output = thunkflow()
        .current_dir(env.path())
        .args(["validate", request.to_str().unwrap()])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Circular dependency"));
}

#[tokio::test]
async fn test_cli_nonexistent_request() {
    let output = thunkflow()
        .args(["run", "/nonexistent/request.yaml"])
        .output()
        .unwrap();

    assert!(!output.status.success());
}
