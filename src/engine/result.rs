// ABOUTME: Per-thunk results and workflow result accounting
// ABOUTME: Folds step states into counts, terminal status, and mode-specific counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::request::{ExecutionMode, FailureStrategy};
use super::step::{StepId, StepState, WorkflowStep};
use super::thunk::{Thunk, ThunkId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThunkResult {
    pub thunk_id: ThunkId,
    pub origin_id: Option<ThunkId>,
    pub step_id: StepId,
    pub target_role: String,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// What happened to one step, kept so callers can decide on compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: StepId,
    pub name: String,
    pub state: StepState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub thunks_dispatched: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub execution_mode: ExecutionMode,
    pub failure_strategy: FailureStrategy,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub steps_cancelled: usize,
    pub emitted_thunks: Vec<Thunk>,
    pub results: Vec<ThunkResult>,
    pub steps: Vec<StepOutcome>,
    #[serde(with = "humantime_serde")]
    pub processing_time: Duration,
    pub waves: Option<usize>,
    pub admitted_operations: Option<usize>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Everything a strategy hands back for final accounting.
#[derive(Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_name: String,
    pub execution_mode: ExecutionMode,
    pub failure_strategy: FailureStrategy,
    pub steps: Vec<WorkflowStep>,
    pub emitted_thunks: Vec<Thunk>,
    pub results: Vec<ThunkResult>,
    pub waves: Option<usize>,
    pub admitted_operations: Option<usize>,
    pub first_error: Option<String>,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl ThunkResult {
    pub fn succeeded(thunk: &Thunk, step_id: &str, output: serde_json::Value) -> Self {
        Self {
            thunk_id: thunk.id.clone(),
            origin_id: thunk.origin_id.clone(),
            step_id: step_id.to_string(),
            target_role: thunk.target_role.clone(),
            success: true,
            output: Some(output),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(thunk: &Thunk, step_id: &str, error: impl Into<String>) -> Self {
        Self {
            thunk_id: thunk.id.clone(),
            origin_id: thunk.origin_id.clone(),
            step_id: step_id.to_string(),
            target_role: thunk.target_role.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.success
    }
}

impl StepOutcome {
    fn from_step(step: &WorkflowStep) -> Self {
        Self {
            step_id: step.id.clone(),
            name: step.name.clone(),
            state: step.state,
            error: step.error.clone(),
            started_at: step.started_at,
            finished_at: step.finished_at,
            thunks_dispatched: step.results.len(),
        }
    }
}

impl WorkflowResult {
    /// Single accounting pass shared by every execution mode.
    ///
    /// Reads step states only; it never runs anything.
    pub fn account(record: RunRecord) -> Self {
        let count = |state: StepState| record.steps.iter().filter(|s| s.state == state).count();

        let steps_completed = count(StepState::Completed);
        let steps_failed = count(StepState::Failed);
        let steps_skipped = count(StepState::Skipped);
        let steps_cancelled = count(StepState::Cancelled);

        let status = if record.timed_out {
            WorkflowStatus::Cancelled
        } else if steps_failed == 0 {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };

        let finished_at = Utc::now();
        let processing_time = (finished_at - record.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut metadata = record.metadata;
        metadata.insert(
            "execution_mode".to_string(),
            record.execution_mode.to_string(),
        );
        metadata.insert(
            "failure_strategy".to_string(),
            record.failure_strategy.to_string(),
        );

        Self {
            run_id: record.run_id,
            workflow_name: record.workflow_name,
            status,
            execution_mode: record.execution_mode,
            failure_strategy: record.failure_strategy,
            steps_completed,
            steps_failed,
            steps_skipped,
            steps_cancelled,
            emitted_thunks: record.emitted_thunks,
            results: record.results,
            steps: record.steps.iter().map(StepOutcome::from_step).collect(),
            processing_time,
            waves: record.waves,
            admitted_operations: record.admitted_operations,
            error: record.first_error,
            started_at: record.started_at,
            finished_at,
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Steps that actually ran to a terminal outcome.
    pub fn steps_processed(&self) -> usize {
        self.steps_completed + self.steps_failed
    }

    pub fn get_step(&self, step_id: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Steps that failed, for callers applying a rollback policy.
    pub fn failed_steps(&self) -> Vec<&StepOutcome> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Failed)
            .collect()
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
