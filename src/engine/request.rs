// ABOUTME: Workflow request types describing what a caller submits to the engine
// ABOUTME: Defines execution modes, failure strategies, and request-level validation

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use super::error::{ExecutionError, Result};
use super::step::WorkflowStep;

fn default_name() -> String {
    "workflow".to_string()
}

fn default_resolve_dependencies() -> bool {
    true
}

fn default_max_parallel_steps() -> usize {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    #[default]
    FailFast,
    Continue,
    /// Passed through to callers; the scheduler treats it like `Continue`.
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default = "default_name")]
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_resolve_dependencies")]
    pub resolve_dependencies: bool,
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(with = "humantime_serde", default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FailureStrategy {
    pub fn aborts_on_failure(&self) -> bool {
        matches!(self, FailureStrategy::FailFast)
    }
}

impl WorkflowRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            execution_mode: ExecutionMode::default(),
            resolve_dependencies: default_resolve_dependencies(),
            max_parallel_steps: default_max_parallel_steps(),
            failure_strategy: FailureStrategy::default(),
            timeout: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_dependency_resolution(mut self, enabled: bool) -> Self {
        self.resolve_dependencies = enabled;
        self
    }

    pub fn with_max_parallel_steps(mut self, max_parallel_steps: usize) -> Self {
        self.max_parallel_steps = max_parallel_steps;
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Structural checks that do not need the dependency graph.
    pub fn validate_shape(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ExecutionError::EmptyWorkflow);
        }

        if self.max_parallel_steps == 0 {
            return Err(ExecutionError::InvalidRequest {
                message: "max_parallel_steps must be at least 1".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(ExecutionError::DuplicateStepId {
                    step_id: step.id.clone(),
                });
            }
        }

        Ok(())
    }
}

impl FromStr for ExecutionMode {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "batch" => Ok(ExecutionMode::Batch),
            other => Err(ExecutionError::InvalidRequest {
                message: format!("unknown execution mode '{}'", other),
            }),
        }
    }
}

impl FromStr for FailureStrategy {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(FailureStrategy::FailFast),
            "continue" => Ok(FailureStrategy::Continue),
            "rollback" => Ok(FailureStrategy::Rollback),
            other => Err(ExecutionError::InvalidRequest {
                message: format!("unknown failure strategy '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Batch => write!(f, "batch"),
        }
    }
}

impl std::fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStrategy::FailFast => write!(f, "fail_fast"),
            FailureStrategy::Continue => write!(f, "continue"),
            FailureStrategy::Rollback => write!(f, "rollback"),
        }
    }
}
