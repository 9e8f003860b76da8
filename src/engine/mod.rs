// ABOUTME: Execution engine module for the thunkflow workflow scheduler
// ABOUTME: Handles thunk emission, step dependency resolution, admission, and scheduling strategies

pub mod admission;
pub mod condition;
pub mod dependency;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod request;
pub mod result;
pub mod scheduler;
pub mod step;
pub mod thunk;

pub use admission::{AdmissionController, AdmissionPermit, AdmissionStats, StepGate};
pub use condition::{ConditionRegistry, StepCondition};
pub use dependency::DependencyGraph;
pub use dispatch::{AcknowledgingWorker, Dispatcher, WorkerRole};
pub use error::{ExecutionError, Gate, Result};
pub use executor::{ActiveWorkflow, EngineConfig, EngineStats, ExecutionEngine};
pub use metrics::{MetricsAggregator, MetricsSnapshot, ModeMetrics};
pub use request::{ExecutionMode, FailureStrategy, WorkflowRequest};
pub use result::{StepOutcome, ThunkResult, WorkflowResult, WorkflowStatus};
pub use step::{StepId, StepState, WorkflowStep};
pub use thunk::{EmissionLog, Thunk, ThunkId, ThunkKind, ThunkSpec};
