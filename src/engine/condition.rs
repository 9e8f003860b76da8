// ABOUTME: Named branch conditions deciding whether a workflow step executes
// ABOUTME: Provides the predicate trait, built-in conditions, and an append-only registry

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{ExecutionError, Result};
use super::result::ThunkResult;
use super::step::WorkflowStep;

pub const ALWAYS_TRUE: &str = "always_true";
pub const ALWAYS_FALSE: &str = "always_false";
pub const HAS_PREVIOUS_RESULTS: &str = "has_previous_results";
pub const PREVIOUS_STEP_SUCCESS: &str = "previous_step_success";

/// A predicate evaluated against a step and the results recorded so far in
/// the run.
pub trait StepCondition: Send + Sync {
    fn evaluate(&self, step: &WorkflowStep, prior_results: &[ThunkResult]) -> bool;
}

impl<F> StepCondition for F
where
    F: Fn(&WorkflowStep, &[ThunkResult]) -> bool + Send + Sync,
{
    fn evaluate(&self, step: &WorkflowStep, prior_results: &[ThunkResult]) -> bool {
        self(step, prior_results)
    }
}

struct AlwaysTrue;
struct AlwaysFalse;
struct HasPreviousResults;
struct PreviousStepSuccess;

impl StepCondition for AlwaysTrue {
    fn evaluate(&self, _step: &WorkflowStep, _prior_results: &[ThunkResult]) -> bool {
        true
    }
}

impl StepCondition for AlwaysFalse {
    fn evaluate(&self, _step: &WorkflowStep, _prior_results: &[ThunkResult]) -> bool {
        false
    }
}

impl StepCondition for HasPreviousResults {
    fn evaluate(&self, _step: &WorkflowStep, prior_results: &[ThunkResult]) -> bool {
        !prior_results.is_empty()
    }
}

impl StepCondition for PreviousStepSuccess {
    fn evaluate(&self, _step: &WorkflowStep, prior_results: &[ThunkResult]) -> bool {
        prior_results.last().map_or(true, |r| r.is_successful())
    }
}

pub struct ConditionRegistry {
    conditions: HashMap<String, Arc<dyn StepCondition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        let mut conditions: HashMap<String, Arc<dyn StepCondition>> = HashMap::new();
        conditions.insert(ALWAYS_TRUE.to_string(), Arc::new(AlwaysTrue));
        conditions.insert(ALWAYS_FALSE.to_string(), Arc::new(AlwaysFalse));
        conditions.insert(HAS_PREVIOUS_RESULTS.to_string(), Arc::new(HasPreviousResults));
        conditions.insert(
            PREVIOUS_STEP_SUCCESS.to_string(),
            Arc::new(PreviousStepSuccess),
        );

        Self { conditions }
    }

    /// Register a new named condition. Names are never overwritten.
    pub fn register(&mut self, name: &str, condition: Arc<dyn StepCondition>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ExecutionError::InvalidConditionName {
                name: name.to_string(),
            });
        }
        if self.conditions.contains_key(name) {
            return Err(ExecutionError::DuplicateCondition {
                name: name.to_string(),
            });
        }

        self.conditions.insert(name.to_string(), condition);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    /// Decide whether a step should run. Steps without a condition always run.
    pub fn should_run(&self, step: &WorkflowStep, prior_results: &[ThunkResult]) -> Result<bool> {
        let Some(name) = step.condition.as_deref() else {
            return Ok(true);
        };

        let condition =
            self.conditions
                .get(name)
                .ok_or_else(|| ExecutionError::UnknownCondition {
                    step_id: step.id.clone(),
                    condition: name.to_string(),
                })?;

        Ok(condition.evaluate(step, prior_results))
    }

    /// Check every step's condition name resolves.
    pub fn validate_steps(&self, steps: &[WorkflowStep]) -> Result<()> {
        for step in steps {
            if let Some(name) = step.condition.as_deref() {
                if !self.contains(name) {
                    return Err(ExecutionError::UnknownCondition {
                        step_id: step.id.clone(),
                        condition: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.conditions.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
