// ABOUTME: Workflow steps grouping thunks under an optional branch condition
// ABOUTME: Tracks the step state machine, timestamps, per-thunk results, and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ThunkResult;
use super::thunk::{Thunk, ThunkId};

pub type StepId = String;

fn new_step_id() -> StepId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(default = "new_step_id")]
    pub id: StepId,
    pub name: String,
    #[serde(default)]
    pub thunks: Vec<Thunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub state: StepState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<ThunkResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepState::Pending | StepState::Running)
    }

    /// Legal transitions: pending -> running | skipped | cancelled,
    /// running -> completed | failed | cancelled. Terminal states are final.
    pub fn can_transition_to(&self, next: StepState) -> bool {
        matches!(
            (self, next),
            (StepState::Pending, StepState::Running)
                | (StepState::Pending, StepState::Skipped)
                | (StepState::Pending, StepState::Cancelled)
                | (StepState::Running, StepState::Completed)
                | (StepState::Running, StepState::Failed)
                | (StepState::Running, StepState::Cancelled)
        )
    }
}

impl WorkflowStep {
    pub fn new(id: impl Into<StepId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            thunks: Vec::new(),
            condition: None,
            state: StepState::Pending,
            started_at: None,
            finished_at: None,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn with_thunk(mut self, thunk: Thunk) -> Self {
        self.thunks.push(thunk);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn owns_thunk(&self, thunk_id: &str) -> bool {
        self.thunks.iter().any(|t| t.id == thunk_id)
    }

    /// Thunk ids this step depends on, in declaration order.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &ThunkId> {
        self.thunks.iter().flat_map(|t| t.dependencies.iter())
    }

    /// Batch grouping key: the kind of the first owned thunk.
    pub fn affinity_key(&self) -> String {
        self.thunks
            .first()
            .map(|t| t.kind.to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, next: StepState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                "Ignoring step {} transition {} -> {}",
                self.id,
                self.state,
                next
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn mark_started(&mut self) -> bool {
        let moved = self.transition(StepState::Running);
        if moved {
            self.started_at = Some(Utc::now());
        }
        moved
    }

    pub fn mark_completed(&mut self) -> bool {
        let moved = self.transition(StepState::Completed);
        if moved {
            self.finished_at = Some(Utc::now());
        }
        moved
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        let moved = self.transition(StepState::Failed);
        if moved {
            self.finished_at = Some(Utc::now());
            self.error = Some(error.into());
        }
        moved
    }

    pub fn mark_skipped(&mut self) -> bool {
        let moved = self.transition(StepState::Skipped);
        if moved {
            self.finished_at = Some(Utc::now());
        }
        moved
    }

    pub fn mark_cancelled(&mut self) -> bool {
        let moved = self.transition(StepState::Cancelled);
        if moved {
            self.finished_at = Some(Utc::now());
        }
        moved
    }

    pub fn record_result(&mut self, result: ThunkResult) {
        self.results.push(result);
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Running => write!(f, "running"),
            StepState::Completed => write!(f, "completed"),
            StepState::Failed => write!(f, "failed"),
            StepState::Skipped => write!(f, "skipped"),
            StepState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::thunk::ThunkKind;

    #[test]
    fn test_step_lifecycle() {
        let mut step = WorkflowStep::new("s1", "first");
        assert_eq!(step.state, StepState::Pending);
        assert!(!step.is_finished());

        assert!(step.mark_started());
        assert_eq!(step.state, StepState::Running);
        assert!(step.started_at.is_some());

        assert!(step.mark_completed());
        assert_eq!(step.state, StepState::Completed);
        assert!(step.is_finished());
        assert!(step.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut step = WorkflowStep::new("s1", "first");
        step.mark_started();
        step.mark_failed("boom");

        assert!(!step.mark_completed());
        assert!(!step.mark_started());
        assert_eq!(step.state, StepState::Failed);
        assert_eq!(step.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut step = WorkflowStep::new("s1", "first");
        step.mark_started();
        assert!(!step.mark_skipped());

        let mut step = WorkflowStep::new("s2", "second");
        assert!(step.mark_skipped());
        assert_eq!(step.state, StepState::Skipped);
    }

    #[test]
    fn test_affinity_key_uses_first_thunk_kind() {
        let step = WorkflowStep::new("s1", "first")
            .with_thunk(Thunk::new(ThunkKind::Reduce, "reducer"))
            .with_thunk(Thunk::new(ThunkKind::Compute, "calculator"));
        assert_eq!(step.affinity_key(), "reduce");

        let empty = WorkflowStep::new("s2", "empty");
        assert_eq!(empty.affinity_key(), "none");
    }
}
