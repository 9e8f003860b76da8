// ABOUTME: Command implementations for the thunkflow CLI
// ABOUTME: Handles execution of the run and validate commands

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use super::config::Config;
use crate::engine::{ExecutionEngine, ExecutionMode, WorkflowResult, WorkflowStatus};
use crate::parser::RequestParser;

/// Execute a workflow request
pub async fn run_request(
    request_path: PathBuf,
    mode: Option<ExecutionMode>,
    max_parallel: Option<usize>,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    info!("Starting workflow request: {}", request_path.display());

    let mut request = RequestParser::new()
        .parse_file(&request_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse workflow request: {}", e))?;

    if let Some(mode) = mode {
        request.execution_mode = mode;
    }
    if let Some(max_parallel) = max_parallel {
        request.max_parallel_steps = max_parallel;
    }

    let engine = ExecutionEngine::new(config.engine.clone());
    let result = engine
        .submit(request)
        .await
        .map_err(|e| anyhow::anyhow!("Workflow execution failed: {}", e))?;

    if let Some(output_path) = output {
        let json_content = serde_json::to_string_pretty(&result)
            .map_err(|e| anyhow::anyhow!("Failed to serialize results to JSON: {}", e))?;

        std::fs::write(&output_path, json_content).map_err(|e| {
            anyhow::anyhow!(
                "Failed to write output file '{}': {}",
                output_path.display(),
                e
            )
        })?;

        info!("Results written to: {}", output_path.display());
    } else {
        print_summary(&result);
    }

    match result.status {
        WorkflowStatus::Completed => Ok(()),
        status => Err(anyhow::anyhow!(
            "Workflow '{}' did not complete: {}",
            result.workflow_name,
            result.error.clone().unwrap_or_else(|| status.to_string())
        )),
    }
}

/// Validate a workflow request and print its execution order
pub async fn validate_request(request_path: PathBuf, config: &Config) -> Result<()> {
    info!("Validating workflow request: {}", request_path.display());

    let request = RequestParser::new()
        .parse_file(&request_path)
        .await
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;

    let engine = ExecutionEngine::new(config.engine.clone());
    let graph = engine
        .validate(&request)
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;
    let order = graph.topological_order()?;

    println!("✓ Workflow '{}' is valid", request.name);
    println!("  Steps: {}", request.steps.len());
    println!("  Mode: {}", request.execution_mode);
    println!("  Execution order: {}", order.join(" -> "));

    Ok(())
}

fn print_summary(result: &WorkflowResult) {
    println!(
        "Workflow '{}' finished with status: {} in {:?}",
        result.workflow_name, result.status, result.processing_time
    );

    for step in &result.steps {
        println!(
            "  Step '{}': {:?} ({} thunks)",
            step.step_id, step.state, step.thunks_dispatched
        );
        if let Some(ref error) = step.error {
            println!("    Error: {}", error);
        }
    }

    if let Some(waves) = result.waves {
        println!("  Waves: {}", waves);
    }
    if let Some(admitted) = result.admitted_operations {
        println!("  Admitted operations: {}", admitted);
    }
    println!("  Emitted thunks: {}", result.emitted_thunks.len());
}
