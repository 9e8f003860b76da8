// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a request builder, a scripted worker role, and temp file environments

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::fs;

use thunkflow::engine::{
    Dispatcher, EngineConfig, ExecutionEngine, ExecutionMode, FailureStrategy, Thunk, ThunkKind,
    WorkerRole, WorkflowRequest, WorkflowStep,
};

pub const ROLE: &str = "scripted";

/// Builds requests whose steps each own one thunk named `<step>_t`.
pub struct TestRequestBuilder {
    request: WorkflowRequest,
}

impl TestRequestBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            request: WorkflowRequest::new(name),
        }
    }

    pub fn thunk_id(step_id: &str) -> String {
        format!("{}_t", step_id)
    }

    fn thunk(step_id: &str, kind: ThunkKind, deps: &[&str]) -> Thunk {
        let mut thunk = Thunk::new(kind, ROLE).with_id(Self::thunk_id(step_id));
        for dep in deps {
            thunk = thunk.with_dependency(Self::thunk_id(dep));
        }
        thunk
    }

    pub fn step(self, id: &str) -> Self {
        self.step_after(id, &[])
    }

    pub fn step_after(mut self, id: &str, deps: &[&str]) -> Self {
        let step = WorkflowStep::new(id, id).with_thunk(Self::thunk(id, ThunkKind::Compute, deps));
        self.request = self.request.with_step(step);
        self
    }

    pub fn kind_step(self, id: &str, kind: ThunkKind) -> Self {
        self.kind_step_after(id, kind, &[])
    }

    pub fn kind_step_after(mut self, id: &str, kind: ThunkKind, deps: &[&str]) -> Self {
        let step = WorkflowStep::new(id, id).with_thunk(Self::thunk(id, kind, deps));
        self.request = self.request.with_step(step);
        self
    }

    /// A step whose thunk the scripted worker always fails.
    pub fn failing_step(self, id: &str) -> Self {
        self.failing_step_after(id, &[])
    }

    pub fn failing_step_after(mut self, id: &str, deps: &[&str]) -> Self {
        let thunk = Self::thunk(id, ThunkKind::Compute, deps)
            .with_operation("fail", serde_json::json!(true));
        self.request = self.request.with_step(WorkflowStep::new(id, id).with_thunk(thunk));
        self
    }

    /// A step whose thunk sleeps for `ms` inside the worker.
    pub fn slow_step(mut self, id: &str, ms: u64) -> Self {
        let thunk = Self::thunk(id, ThunkKind::Compute, &[])
            .with_operation("sleep_ms", serde_json::json!(ms));
        self.request = self.request.with_step(WorkflowStep::new(id, id).with_thunk(thunk));
        self
    }

    pub fn conditional_step(mut self, id: &str, condition: &str) -> Self {
        let step = WorkflowStep::new(id, id)
            .with_thunk(Self::thunk(id, ThunkKind::Compute, &[]))
            .with_condition(condition);
        self.request = self.request.with_step(step);
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.request = self.request.with_mode(mode);
        self
    }

    pub fn strategy(mut self, strategy: FailureStrategy) -> Self {
        self.request = self.request.with_failure_strategy(strategy);
        self
    }

    pub fn max_parallel(mut self, max_parallel_steps: usize) -> Self {
        self.request = self.request.with_max_parallel_steps(max_parallel_steps);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.with_timeout(timeout);
        self
    }

    pub fn build(self) -> WorkflowRequest {
        self.request
    }

    pub async fn write_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(&self.request)?;
        fs::write(path, yaml).await?;
        Ok(())
    }
}

/// Worker role that records what it ran and fails on demand.
///
/// Thunks are keyed by their declared id (the emitted thunk's origin).
#[derive(Default)]
pub struct ScriptedWorker {
    delay: Duration,
    fail_on: HashSet<String>,
    started: Mutex<Vec<String>>,
    started_at: Mutex<HashMap<String, Instant>>,
    finished_at: Mutex<HashMap<String, Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, step_id: &str) -> Self {
        self.fail_on.insert(TestRequestBuilder::thunk_id(step_id));
        self
    }

    /// Step ids in the order their thunks started.
    pub fn start_order(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.trim_end_matches("_t").to_string())
            .collect()
    }

    pub fn started_at(&self, step_id: &str) -> Option<Instant> {
        self.started_at
            .lock()
            .unwrap()
            .get(&TestRequestBuilder::thunk_id(step_id))
            .copied()
    }

    pub fn finished_at(&self, step_id: &str) -> Option<Instant> {
        self.finished_at
            .lock()
            .unwrap()
            .get(&TestRequestBuilder::thunk_id(step_id))
            .copied()
    }

    pub fn ran(&self, step_id: &str) -> bool {
        self.started_at(step_id).is_some()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerRole for ScriptedWorker {
    fn role(&self) -> &str {
        ROLE
    }

    async fn execute(&self, thunk: &Thunk) -> anyhow::Result<serde_json::Value> {
        let key = thunk.origin_id.clone().unwrap_or_else(|| thunk.id.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(key.clone());
        self.started_at
            .lock()
            .unwrap()
            .insert(key.clone(), Instant::now());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let sleep_ms = thunk
            .operation
            .get("sleep_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.delay);
        if !sleep_ms.is_zero() {
            tokio::time::sleep(sleep_ms).await;
        }

        self.finished_at
            .lock()
            .unwrap()
            .insert(key.clone(), Instant::now());

        let scripted_failure = thunk.operation.get("fail").and_then(|v| v.as_bool()) == Some(true);
        if scripted_failure || self.fail_on.contains(&key) {
            anyhow::bail!("scripted failure for {}", key);
        }

        Ok(serde_json::json!({ "thunk": key }))
    }
}

/// An engine whose dispatcher routes the scripted role to `worker`.
pub fn engine_with(worker: Arc<ScriptedWorker>, config: EngineConfig) -> ExecutionEngine {
    let dispatcher = Dispatcher::strict()
        .with_worker(worker)
        .expect("scripted role registers once");
    ExecutionEngine::with_dispatcher(config, dispatcher)
}

pub fn engine(worker: Arc<ScriptedWorker>) -> ExecutionEngine {
    engine_with(worker, EngineConfig::default())
}

pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn request_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(format!("{}.yaml", name))
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(format!("{}.json", name))
    }

    pub async fn create_request_file(&self, name: &str, builder: &TestRequestBuilder) -> PathBuf {
        let path = self.request_file(name);
        builder
            .write_to_file(&path)
            .await
            .expect("Failed to write request file");
        path
    }

    pub async fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content)
            .await
            .expect("Failed to write file");
        path
    }
}

pub async fn read_json_output(path: &Path) -> serde_json::Value {
    let content = fs::read_to_string(path)
        .await
        .expect("Failed to read output file");
    serde_json::from_str(&content).expect("Output is not valid JSON")
}
