// ABOUTME: Main library module for the thunkflow workflow scheduler
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod parser;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{
    EngineConfig, ExecutionEngine, ExecutionMode, FailureStrategy, Thunk, ThunkKind,
    WorkflowRequest, WorkflowResult, WorkflowStatus, WorkflowStep,
};
pub use parser::RequestParser;

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
