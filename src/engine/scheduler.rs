// ABOUTME: Step scheduling strategies for sequential, parallel-wave, and batch execution
// ABOUTME: Runs steps against the dispatcher, applies the failure strategy, and tracks run state

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::admission::StepGate;
use super::condition::ConditionRegistry;
use super::dependency::DependencyGraph;
use super::dispatch::Dispatcher;
use super::error::{ExecutionError, Result};
use super::request::{ExecutionMode, FailureStrategy, WorkflowRequest};
use super::result::{RunRecord, ThunkResult};
use super::step::{StepId, StepState, WorkflowStep};
use super::thunk::{EmissionLog, Thunk};

/// What a unit of step work handed back.
#[derive(Debug)]
pub enum UnitOutcome {
    Completed,
    Failed(ExecutionError),
    Cancelled,
    /// Never admitted; the step stays pending.
    NotStarted,
    /// The step gate refused the step.
    Rejected(ExecutionError),
}

#[derive(Debug)]
pub struct StepRun {
    pub index: usize,
    pub step: WorkflowStep,
    pub emitted: Vec<Thunk>,
    pub results: Vec<ThunkResult>,
    pub outcome: UnitOutcome,
    pub admitted: bool,
}

/// Everything a step needs to run detached from the run loop.
#[derive(Clone)]
pub struct StepContext {
    pub engine_id: Arc<str>,
    pub dispatcher: Arc<Dispatcher>,
    pub cancel: CancellationToken,
}

/// Mutable state of one workflow run, owned by its run loop.
pub struct RunState {
    run_id: String,
    workflow_name: String,
    mode: ExecutionMode,
    strategy: FailureStrategy,
    steps: Vec<WorkflowStep>,
    positions: HashMap<StepId, usize>,
    emission: EmissionLog,
    results: Vec<ThunkResult>,
    failures: usize,
    first_error: Option<String>,
    waves: usize,
    admitted: usize,
    timed_out: bool,
    started_at: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

impl StepRun {
    fn untouched(index: usize, step: WorkflowStep, outcome: UnitOutcome) -> Self {
        Self {
            index,
            step,
            emitted: Vec::new(),
            results: Vec::new(),
            outcome,
            admitted: false,
        }
    }
}

/// Run one step: emit and dispatch its thunks in declaration order.
///
/// The first dispatch error fails the step. Cancellation is observed before
/// each thunk and while a dispatch is in flight.
pub async fn execute_step(index: usize, mut step: WorkflowStep, ctx: StepContext) -> StepRun {
    let mut emitted = Vec::with_capacity(step.thunks.len());
    let mut results = Vec::with_capacity(step.thunks.len());

    if ctx.cancel.is_cancelled() {
        step.mark_cancelled();
        return StepRun::untouched(index, step, UnitOutcome::Cancelled);
    }

    step.mark_started();
    debug!("Running step {} ({} thunks)", step.id, step.thunks.len());

    let declared = step.thunks.clone();
    for declared_thunk in &declared {
        let thunk = declared_thunk.stamp(&ctx.engine_id);
        emitted.push(thunk.clone());

        let dispatched = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            output = ctx.dispatcher.dispatch(&thunk) => Some(output),
        };

        match dispatched {
            None => {
                warn!("Step {} cancelled while dispatching {}", step.id, thunk.id);
                step.mark_cancelled();
                return StepRun {
                    index,
                    step,
                    emitted,
                    results,
                    outcome: UnitOutcome::Cancelled,
                    admitted: false,
                };
            }
            Some(Ok(output)) => {
                let result = ThunkResult::succeeded(&thunk, &step.id, output);
                step.record_result(result.clone());
                results.push(result);
            }
            Some(Err(err)) => {
                let message = err.to_string();
                let result = ThunkResult::failed(&thunk, &step.id, message.clone());
                step.record_result(result.clone());
                results.push(result);
                step.mark_failed(message.clone());
                error!("Step {} failed: {}", step.id, message);

                let failure = ExecutionError::StepFailed {
                    step_id: step.id.clone(),
                    message,
                };
                return StepRun {
                    index,
                    step,
                    emitted,
                    results,
                    outcome: UnitOutcome::Failed(failure),
                    admitted: false,
                };
            }
        }
    }

    step.mark_completed();
    debug!("Step {} completed", step.id);
    StepRun {
        index,
        step,
        emitted,
        results,
        outcome: UnitOutcome::Completed,
        admitted: false,
    }
}

/// Run a step, turning a panic inside it into a step failure.
async fn execute_step_guarded(index: usize, step: WorkflowStep, ctx: StepContext) -> StepRun {
    let fallback = step.clone();
    match AssertUnwindSafe(execute_step(index, step, ctx))
        .catch_unwind()
        .await
    {
        Ok(run) => run,
        Err(_) => {
            let mut step = fallback;
            step.mark_started();
            step.mark_failed("step panicked");
            let failure = ExecutionError::StepFailed {
                step_id: step.id.clone(),
                message: "step panicked".to_string(),
            };
            StepRun::untouched(index, step, UnitOutcome::Failed(failure))
        }
    }
}

impl RunState {
    pub fn new(run_id: String, request: WorkflowRequest, emit_thunks: bool) -> Self {
        let positions = request
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        Self {
            run_id,
            workflow_name: request.name,
            mode: request.execution_mode,
            strategy: request.failure_strategy,
            steps: request.steps,
            positions,
            emission: EmissionLog::new(emit_thunks),
            results: Vec::new(),
            failures: 0,
            first_error: None,
            waves: 0,
            admitted: 0,
            timed_out: false,
            started_at: Utc::now(),
            metadata: request.metadata,
        }
    }

    fn position(&self, step_id: &str) -> Result<usize> {
        self.positions
            .get(step_id)
            .copied()
            .ok_or_else(|| ExecutionError::StepNotFound {
                step_id: step_id.to_string(),
            })
    }

    /// Fold a finished unit back into the run. Returns true when the unit
    /// failed.
    fn absorb(&mut self, run: StepRun) -> bool {
        let index = run.index;
        self.emission.record(run.emitted);
        self.results.extend(run.results);
        if run.admitted {
            self.admitted += 1;
        }

        let failed = match &run.outcome {
            UnitOutcome::Failed(err) => {
                self.failures += 1;
                self.first_error.get_or_insert_with(|| err.to_string());
                true
            }
            _ => false,
        };

        self.steps[index] = run.step;
        failed
    }

    fn cancel_pending(&mut self, index: usize) {
        if self.steps[index].state == StepState::Pending {
            self.steps[index].mark_cancelled();
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn into_record(self) -> RunRecord {
        let (waves, admitted_operations) = match self.mode {
            ExecutionMode::Parallel => (Some(self.waves), None),
            ExecutionMode::Batch => (None, Some(self.admitted)),
            ExecutionMode::Sequential => (None, None),
        };

        RunRecord {
            run_id: self.run_id,
            workflow_name: self.workflow_name,
            execution_mode: self.mode,
            failure_strategy: self.strategy,
            steps: self.steps,
            emitted_thunks: self.emission.into_thunks(),
            results: self.results,
            waves,
            admitted_operations,
            first_error: self.first_error,
            timed_out: self.timed_out,
            started_at: self.started_at,
            metadata: self.metadata,
        }
    }
}

/// Drives one workflow run with the selected strategy.
pub struct StepScheduler<'a> {
    pub conditions: &'a ConditionRegistry,
    pub context: StepContext,
    pub deadline: Option<Instant>,
}

impl<'a> StepScheduler<'a> {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Evaluate the step's condition and settle it as skipped when false.
    fn admit_condition(&self, state: &mut RunState, index: usize) -> Result<bool> {
        let should_run = self
            .conditions
            .should_run(&state.steps[index], &state.results)?;
        if !should_run {
            info!("Step {} condition not met, skipping", state.steps[index].id);
            state.steps[index].mark_skipped();
        }
        Ok(should_run)
    }

    /// Steps in order; topological when a graph is supplied.
    pub async fn run_sequential(
        &self,
        state: &mut RunState,
        graph: Option<&DependencyGraph>,
    ) -> Result<()> {
        let order: Vec<usize> = match graph {
            Some(graph) => graph
                .topological_order()?
                .iter()
                .map(|id| state.position(id))
                .collect::<Result<_>>()?,
            None => (0..state.steps.len()).collect(),
        };

        for index in order {
            if self.deadline_passed() {
                warn!("Workflow {} timed out", state.run_id);
                state.timed_out = true;
                break;
            }

            if !self.admit_condition(state, index)? {
                continue;
            }

            let step = state.steps[index].clone();
            let unit = execute_step_guarded(index, step, self.context.clone());
            let run = match self.deadline {
                Some(deadline) => match timeout_at(deadline, unit).await {
                    Ok(run) => run,
                    Err(_) => {
                        warn!("Workflow {} timed out during step {}", state.run_id, index);
                        state.timed_out = true;
                        state.cancel_pending(index);
                        break;
                    }
                },
                None => unit.await,
            };

            if state.absorb(run) && state.strategy.aborts_on_failure() {
                warn!("Aborting workflow {} after step failure", state.run_id);
                break;
            }
        }

        Ok(())
    }

    /// Waves of ready steps joined at a barrier before the next wave starts.
    pub async fn run_parallel(
        &self,
        state: &mut RunState,
        mut graph: DependencyGraph,
        max_parallel_steps: usize,
    ) -> Result<()> {
        loop {
            if self.deadline_passed() {
                warn!("Workflow {} timed out", state.run_id);
                state.timed_out = true;
                break;
            }

            let mut wave = Vec::new();
            let mut settled_any = false;
            for step_id in graph.ready_steps() {
                if wave.len() >= max_parallel_steps {
                    break;
                }
                let index = state.position(&step_id)?;
                if state.steps[index].state != StepState::Pending {
                    continue;
                }
                if self.admit_condition(state, index)? {
                    wave.push(index);
                } else {
                    graph.mark_completed(&step_id)?;
                    settled_any = true;
                }
            }

            if wave.is_empty() {
                if settled_any {
                    continue;
                }
                break;
            }

            state.waves += 1;
            info!(
                "Executing wave {} with {} steps",
                state.waves,
                wave.len()
            );

            let wave_cancel = self.context.cancel.child_token();
            let mut units = JoinSet::new();
            for &index in &wave {
                let step = state.steps[index].clone();
                let ctx = StepContext {
                    cancel: wave_cancel.clone(),
                    ..self.context.clone()
                };
                units.spawn(execute_step_guarded(index, step, ctx));
            }

            let mut abort = false;
            let runs = self.drain(&mut units, &wave_cancel, state).await;
            for run in runs {
                let step_id = run.step.id.clone();
                let completed = matches!(run.outcome, UnitOutcome::Completed);
                let failed = state.absorb(run);

                if completed {
                    graph.mark_completed(&step_id)?;
                }
                if failed && state.strategy.aborts_on_failure() {
                    abort = true;
                }
            }

            // Units cancelled before they started still hold pending steps.
            for &index in &wave {
                state.cancel_pending(index);
            }

            if abort {
                warn!("Aborting workflow {} after wave {}", state.run_id, state.waves);
                break;
            }
            if state.timed_out {
                break;
            }
        }

        Ok(())
    }

    /// Steps grouped by affinity and admitted through the step gate.
    ///
    /// Each round takes the ready steps of the earliest affinity group that
    /// has any, so a step starts only after every step it depends on has
    /// settled. Each step runs exactly once; accounting happens afterwards
    /// over the settled step states.
    pub async fn run_batch(
        &self,
        state: &mut RunState,
        mut graph: DependencyGraph,
        gate: StepGate,
    ) -> Result<()> {
        let mut group_order: IndexSet<String> = IndexSet::new();
        for step_id in graph.topological_order()? {
            let index = state.position(&step_id)?;
            group_order.insert(state.steps[index].affinity_key());
        }

        let mut rejection: Option<ExecutionError> = None;

        loop {
            if self.deadline_passed() {
                warn!("Workflow {} timed out", state.run_id);
                state.timed_out = true;
                break;
            }

            let mut ready: Vec<(usize, usize)> = Vec::new();
            for step_id in graph.ready_steps() {
                let index = state.position(&step_id)?;
                if state.steps[index].state != StepState::Pending {
                    continue;
                }
                let rank = group_order
                    .get_index_of(&state.steps[index].affinity_key())
                    .unwrap_or(group_order.len());
                ready.push((rank, index));
            }

            let Some(rank) = ready.iter().map(|&(rank, _)| rank).min() else {
                break;
            };

            let mut members = Vec::new();
            let mut settled_any = false;
            for (member_rank, index) in ready {
                if member_rank != rank {
                    continue;
                }
                if self.admit_condition(state, index)? {
                    members.push(index);
                } else {
                    graph.mark_completed(&state.steps[index].id)?;
                    settled_any = true;
                }
            }

            if members.is_empty() {
                if settled_any {
                    continue;
                }
                break;
            }

            let key = group_order
                .get_index(rank)
                .map(String::as_str)
                .unwrap_or("ungrouped");
            info!("Executing batch group '{}' with {} steps", key, members.len());

            let group_cancel = self.context.cancel.child_token();
            let mut units = JoinSet::new();
            for &index in &members {
                let step = state.steps[index].clone();
                let ctx = StepContext {
                    cancel: group_cancel.clone(),
                    ..self.context.clone()
                };
                let gate = gate.clone();
                units.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => {
                            return StepRun::untouched(index, step, UnitOutcome::NotStarted);
                        }
                        permit = gate.admit() => permit,
                    };
                    let _permit = match permit {
                        Ok(permit) => permit,
                        Err(err) => {
                            return StepRun::untouched(index, step, UnitOutcome::Rejected(err));
                        }
                    };
                    if ctx.cancel.is_cancelled() {
                        return StepRun::untouched(index, step, UnitOutcome::NotStarted);
                    }

                    let mut run = execute_step_guarded(index, step, ctx).await;
                    run.admitted = true;
                    run
                });
            }

            let mut halted = false;
            let runs = self.drain(&mut units, &group_cancel, state).await;
            for mut run in runs {
                let outcome = std::mem::replace(&mut run.outcome, UnitOutcome::NotStarted);
                if let UnitOutcome::Rejected(err) = outcome {
                    halted = true;
                    rejection.get_or_insert(err);
                    state.absorb(run);
                    continue;
                }

                let step_id = run.step.id.clone();
                let completed = matches!(outcome, UnitOutcome::Completed);
                run.outcome = outcome;

                if state.absorb(run) && state.strategy.aborts_on_failure() {
                    halted = true;
                }
                // Dependents of a failed step never become ready.
                if completed {
                    graph.mark_completed(&step_id)?;
                }
            }

            if state.timed_out {
                for &index in &members {
                    state.cancel_pending(index);
                }
                break;
            }
            if halted {
                warn!("Aborting workflow {} in batch group '{}'", state.run_id, key);
                break;
            }
        }

        match rejection {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Join every unit of a wave or group, honouring the run deadline.
    ///
    /// Runs come back in step order regardless of completion order.
    async fn drain(
        &self,
        units: &mut JoinSet<StepRun>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Vec<StepRun> {
        let mut runs = Vec::with_capacity(units.len());

        loop {
            let next = match self.deadline {
                Some(deadline) if !state.timed_out => {
                    match timeout_at(deadline, units.join_next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("Workflow {} timed out, cancelling in-flight steps", state.run_id);
                            state.timed_out = true;
                            cancel.cancel();
                            continue;
                        }
                    }
                }
                _ => units.join_next().await,
            };

            let Some(joined) = next else {
                break;
            };

            match joined {
                Ok(run) => {
                    let aborts = match run.outcome {
                        UnitOutcome::Failed(_) => state.strategy.aborts_on_failure(),
                        UnitOutcome::Rejected(_) => true,
                        _ => false,
                    };
                    if aborts {
                        cancel.cancel();
                    }
                    runs.push(run);
                }
                Err(join_error) => {
                    error!("Step unit join error: {}", join_error);
                }
            }
        }

        runs.sort_by_key(|run| run.index);
        runs
    }
}
