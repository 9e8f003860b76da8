// ABOUTME: Admission control gating concurrently active workflows and in-flight steps
// ABOUTME: Wraps semaphores with bounded waits and releases permits on every exit path

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{ExecutionError, Gate, Result};

/// Two independent capacity gates: one for workflows, one for steps.
#[derive(Debug)]
pub struct AdmissionController {
    workflow_capacity: usize,
    workflow_gate: Arc<Semaphore>,
    step_capacity: usize,
    step_gate: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
    workflows_admitted: AtomicU64,
    steps_admitted: Arc<AtomicU64>,
}

/// A held unit of gate capacity. Dropping it releases the capacity.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Gate,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionStats {
    pub workflow_capacity: usize,
    pub active_workflows: usize,
    pub step_capacity: usize,
    pub active_steps: usize,
    pub workflows_admitted: u64,
    pub steps_admitted: u64,
}

/// Keep a capacity within what a semaphore holds and `acquire_many` can take at once.
fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize))
}

impl AdmissionController {
    /// Create a controller. Capacities below one are raised to one and
    /// oversized ones are lowered to the largest a gate supports.
    pub fn new(workflow_capacity: usize, step_capacity: usize) -> Self {
        let workflow_capacity = clamp_capacity(workflow_capacity);
        let step_capacity = clamp_capacity(step_capacity);

        Self {
            workflow_capacity,
            workflow_gate: Arc::new(Semaphore::new(workflow_capacity)),
            step_capacity,
            step_gate: Arc::new(Semaphore::new(step_capacity)),
            acquire_timeout: None,
            workflows_admitted: AtomicU64::new(0),
            steps_admitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bound how long an acquisition may wait before failing.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = Some(acquire_timeout);
        self
    }

    pub async fn admit_workflow(&self) -> Result<AdmissionPermit> {
        let permit = self.acquire(Gate::Workflow, &self.workflow_gate).await?;
        self.workflows_admitted.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    pub async fn admit_step(&self) -> Result<AdmissionPermit> {
        self.step_gate().admit().await
    }

    /// Handle to the step gate for use from spawned tasks.
    pub fn step_gate(&self) -> StepGate {
        StepGate {
            semaphore: Arc::clone(&self.step_gate),
            acquire_timeout: self.acquire_timeout,
            admitted: Arc::clone(&self.steps_admitted),
        }
    }

    async fn acquire(&self, gate: Gate, semaphore: &Arc<Semaphore>) -> Result<AdmissionPermit> {
        acquire_owned(gate, Arc::clone(semaphore), self.acquire_timeout).await
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            workflow_capacity: self.workflow_capacity,
            active_workflows: self.workflow_capacity - self.workflow_gate.available_permits(),
            step_capacity: self.step_capacity,
            active_steps: self.step_capacity - self.step_gate.available_permits(),
            workflows_admitted: self.workflows_admitted.load(Ordering::Relaxed),
            steps_admitted: self.steps_admitted.load(Ordering::Relaxed),
        }
    }

    /// Wait until no workflow holds a slot.
    pub async fn wait_for_idle(&self) -> Result<()> {
        let _permits = self
            .workflow_gate
            .acquire_many(self.workflow_capacity as u32)
            .await
            .map_err(|_| ExecutionError::GateClosed {
                gate: Gate::Workflow,
            })?;
        Ok(())
    }

    /// Wait for running workflows to drain, then refuse new admissions.
    pub async fn shutdown(&self, timeout_duration: Duration) -> Result<()> {
        info!("Shutting down admission controller...");

        match timeout(timeout_duration, self.wait_for_idle()).await {
            Ok(Ok(())) => {
                self.workflow_gate.close();
                self.step_gate.close();
                info!("Admission controller shutdown completed");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Shutdown timed out after {:?}", timeout_duration);
                Err(ExecutionError::ShutdownTimeout(timeout_duration))
            }
        }
    }
}

/// Cloneable step gate handle that can move into spawned units.
#[derive(Debug, Clone)]
pub struct StepGate {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
    admitted: Arc<AtomicU64>,
}

impl StepGate {
    pub async fn admit(&self) -> Result<AdmissionPermit> {
        let permit =
            acquire_owned(Gate::Step, Arc::clone(&self.semaphore), self.acquire_timeout).await?;
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }
}

async fn acquire_owned(
    gate: Gate,
    semaphore: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
) -> Result<AdmissionPermit> {
    let acquisition = semaphore.acquire_owned();

    let permit = match acquire_timeout {
        Some(limit) => match timeout(limit, acquisition).await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Admission to {} gate timed out after {:?}", gate, limit);
                return Err(ExecutionError::AdmissionTimeout {
                    gate,
                    waited: limit,
                });
            }
        },
        None => acquisition.await,
    }
    .map_err(|_| ExecutionError::GateClosed { gate })?;

    debug!("Admitted through {} gate", gate);
    Ok(AdmissionPermit {
        gate,
        _permit: permit,
    })
}

impl AdmissionPermit {
    pub fn gate(&self) -> Gate {
        self.gate
    }
}

impl AdmissionStats {
    pub fn workflow_utilization(&self) -> f64 {
        if self.workflow_capacity == 0 {
            0.0
        } else {
            (self.active_workflows as f64 / self.workflow_capacity as f64) * 100.0
        }
    }

    pub fn step_utilization(&self) -> f64 {
        if self.step_capacity == 0 {
            0.0
        } else {
            (self.active_steps as f64 / self.step_capacity as f64) * 100.0
        }
    }
}
