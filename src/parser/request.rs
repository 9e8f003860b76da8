// ABOUTME: Loads workflow requests from YAML files or strings
// ABOUTME: Rejects documents whose steps carry execution state from a previous run

use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::error::{ParserError, Result};
use crate::engine::{StepState, WorkflowRequest};

#[derive(Debug, Clone, Copy)]
pub struct RequestParser;

impl RequestParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowRequest> {
        let path = path.as_ref();
        debug!("Reading workflow request from {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .map_err(ParserError::IoError)?;
        self.parse_str(&content)
    }

    pub fn parse_str(&self, content: &str) -> Result<WorkflowRequest> {
        let request: WorkflowRequest = serde_yaml::from_str(content)?;
        self.check_fresh(&request)?;
        Ok(request)
    }

    /// A submitted request describes work to do, not work already done.
    fn check_fresh(&self, request: &WorkflowRequest) -> Result<()> {
        for step in &request.steps {
            if step.state != StepState::Pending || !step.results.is_empty() {
                return Err(ParserError::InvalidFormat(format!(
                    "step '{}' must start pending without results",
                    step.id
                )));
            }
            if step.name.trim().is_empty() {
                return Err(ParserError::InvalidFormat(format!(
                    "step '{}' has an empty name",
                    step.id
                )));
            }
        }
        Ok(())
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}
