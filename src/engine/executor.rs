// ABOUTME: Execution engine accepting workflow requests and running them under admission control
// ABOUTME: Owns the condition registry, dispatcher, metrics, and instance-scoped run registries

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::admission::{AdmissionController, AdmissionStats};
use super::condition::{ConditionRegistry, StepCondition};
use super::dependency::DependencyGraph;
use super::dispatch::Dispatcher;
use super::error::{ExecutionError, Result};
use super::metrics::{MetricsAggregator, MetricsSnapshot};
use super::request::{ExecutionMode, WorkflowRequest};
use super::result::{WorkflowResult, WorkflowStatus};
use super::scheduler::{RunState, StepContext, StepScheduler};
use super::thunk::{Thunk, ThunkSpec};

fn default_max_concurrent_workflows() -> usize {
    4
}

fn default_max_concurrent_steps() -> usize {
    8
}

fn default_admission_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_emit_thunks() -> bool {
    true
}

fn default_metrics_window() -> usize {
    100
}

fn default_finished_history() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,

    /// Capacity of the step gate used by batch execution.
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// How long `submit` and batch steps may wait for a slot. `None` waits forever.
    #[serde(default = "default_admission_timeout", with = "humantime_serde")]
    pub admission_timeout: Option<Duration>,

    #[serde(default = "default_emit_thunks")]
    pub emit_thunks: bool,

    /// Fail thunks addressed to roles without a registered worker.
    #[serde(default)]
    pub strict_dispatch: bool,

    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,

    /// Final statuses kept for `workflow_status`; the oldest are evicted first.
    #[serde(default = "default_finished_history")]
    pub finished_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: default_max_concurrent_workflows(),
            max_concurrent_steps: default_max_concurrent_steps(),
            admission_timeout: default_admission_timeout(),
            emit_thunks: default_emit_thunks(),
            strict_dispatch: false,
            metrics_window: default_metrics_window(),
            finished_history: default_finished_history(),
        }
    }
}

/// A workflow currently holding an admission slot.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveWorkflow {
    pub run_id: String,
    pub workflow_name: String,
    pub execution_mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub engine_id: String,
    pub admission: AdmissionStats,
    pub active_workflows: usize,
    pub emitted_thunks: usize,
}

pub struct ExecutionEngine {
    engine_id: Arc<str>,
    config: EngineConfig,
    admission: AdmissionController,
    dispatcher: Arc<Dispatcher>,
    conditions: ConditionRegistry,
    metrics: MetricsAggregator,
    active_workflows: RwLock<HashMap<String, ActiveWorkflow>>,
    finished_workflows: RwLock<IndexMap<String, WorkflowStatus>>,
    emitted: Mutex<Vec<Thunk>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("engine_id", &self.engine_id)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionEngine {
    /// Create an engine whose dispatcher follows `config.strict_dispatch`.
    pub fn new(config: EngineConfig) -> Self {
        let dispatcher = if config.strict_dispatch {
            Dispatcher::strict()
        } else {
            Dispatcher::new()
        };
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create an engine that hands thunks to the given dispatcher.
    pub fn with_dispatcher(config: EngineConfig, dispatcher: Dispatcher) -> Self {
        let mut admission =
            AdmissionController::new(config.max_concurrent_workflows, config.max_concurrent_steps);
        if let Some(limit) = config.admission_timeout {
            admission = admission.with_acquire_timeout(limit);
        }

        let engine_id: Arc<str> = format!("engine-{}", uuid::Uuid::new_v4()).into();
        info!(
            "Created execution engine {} (workflows: {}, steps: {})",
            engine_id, config.max_concurrent_workflows, config.max_concurrent_steps
        );

        Self {
            engine_id,
            metrics: MetricsAggregator::with_window(config.metrics_window),
            config,
            admission,
            dispatcher: Arc::new(dispatcher),
            conditions: ConditionRegistry::new(),
            active_workflows: RwLock::new(HashMap::new()),
            finished_workflows: RwLock::new(IndexMap::new()),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a workflow request to a terminal state.
    ///
    /// Step failures come back as a `failed` result; validation and admission
    /// problems come back as errors before any step runs.
    #[instrument(skip(self, request), fields(workflow = %request.name, mode = %request.execution_mode))]
    pub async fn submit(&self, request: WorkflowRequest) -> Result<WorkflowResult> {
        let graph = self.validate(&request)?;

        let _slot = self.admission.admit_workflow().await?;
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Starting workflow {} (run_id: {}, {} steps, {} mode, {})",
            request.name,
            run_id,
            request.steps.len(),
            request.execution_mode,
            request.failure_strategy
        );

        self.track(&run_id, &request).await;
        let outcome = self.run(run_id.clone(), request, graph).await;

        let final_status = match &outcome {
            Ok(result) => result.status,
            Err(_) => WorkflowStatus::Failed,
        };
        self.untrack(&run_id, final_status).await;

        let result = outcome?;
        self.metrics.record(&result).await;

        info!(
            "Workflow {} finished in {:?} with status: {} ({} completed, {} failed, {} skipped)",
            result.workflow_name,
            result.processing_time,
            result.status,
            result.steps_completed,
            result.steps_failed,
            result.steps_skipped
        );

        Ok(result)
    }

    async fn run(
        &self,
        run_id: String,
        request: WorkflowRequest,
        graph: DependencyGraph,
    ) -> Result<WorkflowResult> {
        let mode = request.execution_mode;
        let resolve = request.resolve_dependencies;
        let max_parallel_steps = request.max_parallel_steps;
        let deadline = request.timeout.map(|limit| Instant::now() + limit);

        let scheduler = StepScheduler {
            conditions: &self.conditions,
            context: StepContext {
                engine_id: Arc::clone(&self.engine_id),
                dispatcher: Arc::clone(&self.dispatcher),
                cancel: CancellationToken::new(),
            },
            deadline,
        };

        let unordered = if resolve {
            None
        } else {
            let mut flat = DependencyGraph::new();
            for step in &request.steps {
                flat.add_step(&step.id);
            }
            Some(flat)
        };

        let mut state = RunState::new(run_id, request, self.config.emit_thunks);

        match mode {
            ExecutionMode::Sequential => {
                scheduler
                    .run_sequential(&mut state, resolve.then_some(&graph))
                    .await?
            }
            ExecutionMode::Parallel => {
                let waves = unordered.unwrap_or(graph);
                scheduler
                    .run_parallel(&mut state, waves, max_parallel_steps)
                    .await?
            }
            ExecutionMode::Batch => {
                let rounds = unordered.unwrap_or(graph);
                scheduler
                    .run_batch(&mut state, rounds, self.admission.step_gate())
                    .await?
            }
        }

        if state.failures() > 0 {
            debug!("Run finished with {} failed steps", state.failures());
        }

        Ok(WorkflowResult::account(state.into_record()))
    }

    /// Check a request without running it and return its step graph.
    pub fn validate(&self, request: &WorkflowRequest) -> Result<DependencyGraph> {
        request.validate_shape()?;
        self.conditions.validate_steps(&request.steps)?;

        let graph = DependencyGraph::from_steps(&request.steps)?;
        if let Some(steps) = graph.find_cycle() {
            warn!("Rejecting workflow {}: dependency cycle", request.name);
            return Err(ExecutionError::CircularDependency { steps });
        }

        debug!("Workflow {} validated ({} steps)", request.name, graph.len());
        Ok(graph)
    }

    /// Stamp a thunk for the worker layer without executing it.
    pub fn emit_thunk(&self, spec: ThunkSpec) -> Thunk {
        let thunk = Thunk::from_spec(spec, &self.engine_id);
        debug!("Emitted thunk {} for role {}", thunk.id, thunk.target_role);

        if self.config.emit_thunks {
            self.emitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(thunk.clone());
        }
        thunk
    }

    /// Thunks emitted through `emit_thunk` on this engine.
    pub fn emitted_thunks(&self) -> Vec<Thunk> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn register_condition(
        &mut self,
        name: &str,
        condition: Arc<dyn StepCondition>,
    ) -> Result<()> {
        self.conditions.register(name, condition)?;
        info!("Registered condition '{}'", name);
        Ok(())
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    pub async fn get_stats(&self) -> EngineStats {
        EngineStats {
            engine_id: self.engine_id.to_string(),
            admission: self.admission.stats(),
            active_workflows: self.active_workflows.read().await.len(),
            emitted_thunks: self
                .emitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    pub async fn workflow_status(&self, run_id: &str) -> Option<WorkflowStatus> {
        if self.active_workflows.read().await.contains_key(run_id) {
            return Some(WorkflowStatus::Running);
        }
        self.finished_workflows.read().await.get(run_id).copied()
    }

    /// Forget the final statuses of finished runs. Returns how many were dropped.
    pub async fn clear_finished(&self) -> usize {
        let mut finished = self.finished_workflows.write().await;
        let dropped = finished.len();
        finished.clear();
        dropped
    }

    pub async fn active_workflows(&self) -> Vec<ActiveWorkflow> {
        let mut active: Vec<ActiveWorkflow> =
            self.active_workflows.read().await.values().cloned().collect();
        active.sort_by_key(|w| w.started_at);
        active
    }

    /// Wait for running workflows to finish, then refuse new submissions.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down execution engine {}...", self.engine_id);
        self.admission.shutdown(timeout).await
    }

    async fn track(&self, run_id: &str, request: &WorkflowRequest) {
        self.active_workflows.write().await.insert(
            run_id.to_string(),
            ActiveWorkflow {
                run_id: run_id.to_string(),
                workflow_name: request.name.clone(),
                execution_mode: request.execution_mode,
                started_at: Utc::now(),
            },
        );
    }

    async fn untrack(&self, run_id: &str, status: WorkflowStatus) {
        {
            let mut finished = self.finished_workflows.write().await;
            finished.insert(run_id.to_string(), status);
            let excess = finished.len().saturating_sub(self.config.finished_history);
            if excess > 0 {
                finished.drain(..excess);
                debug!("Evicted {} finished workflow statuses", excess);
            }
        }
        self.active_workflows.write().await.remove(run_id);
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
