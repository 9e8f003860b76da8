// ABOUTME: Error types for the workflow scheduler
// ABOUTME: Separates validation, step, registry, and admission failures

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    // Validation errors, raised before any step runs
    #[error("Workflow has no steps")]
    EmptyWorkflow,

    #[error("Circular dependency detected between steps: {steps:?}")]
    CircularDependency { steps: Vec<String> },

    #[error("Duplicate step id: {step_id}")]
    DuplicateStepId { step_id: String },

    #[error("Step '{step_id}' references unknown condition '{condition}'")]
    UnknownCondition { step_id: String, condition: String },

    #[error("Unknown step: {step_id}")]
    StepNotFound { step_id: String },

    #[error("Invalid workflow request: {message}")]
    InvalidRequest { message: String },

    // Step failures
    #[error("Step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    #[error("Dispatch of thunk {thunk_id} to role '{role}' failed: {message}")]
    Dispatch {
        thunk_id: String,
        role: String,
        message: String,
    },

    // Registry errors
    #[error("Condition already registered: {name}")]
    DuplicateCondition { name: String },

    #[error("Invalid condition name: {name:?}")]
    InvalidConditionName { name: String },

    #[error("Worker role already registered: {role}")]
    DuplicateRole { role: String },

    // Admission errors
    #[error("Admission to {gate} gate timed out after {waited:?}")]
    AdmissionTimeout { gate: Gate, waited: Duration },

    #[error("Admission gate {gate} is closed")]
    GateClosed { gate: Gate },

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// The admission gate an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Workflow,
    Step,
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gate::Workflow => write!(f, "workflow"),
            Gate::Step => write!(f, "step"),
        }
    }
}

impl ExecutionError {
    /// Whether the error is raised before execution starts.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExecutionError::EmptyWorkflow
                | ExecutionError::CircularDependency { .. }
                | ExecutionError::DuplicateStepId { .. }
                | ExecutionError::UnknownCondition { .. }
                | ExecutionError::StepNotFound { .. }
                | ExecutionError::InvalidRequest { .. }
        )
    }

    /// Whether the error came from capacity exhaustion rather than step logic.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            ExecutionError::AdmissionTimeout { .. } | ExecutionError::GateClosed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
