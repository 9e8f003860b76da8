// ABOUTME: Rolling per-execution-mode statistics for completed workflow runs
// ABOUTME: Aggregates workflow counts, processed steps, emitted thunks, and durations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

use super::request::ExecutionMode;
use super::result::{WorkflowResult, WorkflowStatus};

const DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeMetrics {
    pub total_workflows: u64,
    pub successful_workflows: u64,
    pub failed_workflows: u64,
    pub cancelled_workflows: u64,
    pub total_steps_processed: u64,
    pub total_steps_skipped: u64,
    pub total_thunks_emitted: u64,
    #[serde(with = "humantime_serde")]
    pub total_processing_time: Duration,
    /// Mean over the most recent runs only.
    #[serde(with = "humantime_serde")]
    pub rolling_average_time: Duration,
    #[serde(with = "humantime_serde")]
    pub max_processing_time: Duration,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub modes: HashMap<ExecutionMode, ModeMetrics>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ModeAccumulator {
    metrics: ModeMetrics,
    recent: VecDeque<Duration>,
}

#[derive(Debug)]
pub struct MetricsAggregator {
    modes: RwLock<HashMap<ExecutionMode, ModeAccumulator>>,
    window: usize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Keep the rolling average over the last `window` runs.
    pub fn with_window(window: usize) -> Self {
        Self {
            modes: RwLock::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Fold one finished run into its mode's statistics.
    pub async fn record(&self, result: &WorkflowResult) {
        let mut modes = self.modes.write().await;
        let acc = modes.entry(result.execution_mode).or_default();

        acc.recent.push_back(result.processing_time);
        while acc.recent.len() > self.window {
            acc.recent.pop_front();
        }

        let m = &mut acc.metrics;
        m.total_workflows += 1;
        match result.status {
            WorkflowStatus::Completed => m.successful_workflows += 1,
            WorkflowStatus::Cancelled => m.cancelled_workflows += 1,
            _ => m.failed_workflows += 1,
        }
        m.total_steps_processed += result.steps_processed() as u64;
        m.total_steps_skipped += result.steps_skipped as u64;
        m.total_thunks_emitted += result.emitted_thunks.len() as u64;
        m.total_processing_time += result.processing_time;
        m.max_processing_time = m.max_processing_time.max(result.processing_time);
        m.last_run_at = Some(result.finished_at);

        let window_total: Duration = acc.recent.iter().sum();
        m.rolling_average_time = window_total / acc.recent.len() as u32;
    }

    pub async fn for_mode(&self, mode: ExecutionMode) -> ModeMetrics {
        let modes = self.modes.read().await;
        modes
            .get(&mode)
            .map(|acc| acc.metrics.clone())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let modes = self.modes.read().await;
        MetricsSnapshot {
            modes: modes
                .iter()
                .map(|(mode, acc)| (*mode, acc.metrics.clone()))
                .collect(),
            taken_at: Utc::now(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    pub fn mode(&self, mode: ExecutionMode) -> ModeMetrics {
        self.modes.get(&mode).cloned().unwrap_or_default()
    }

    pub fn total_workflows(&self) -> u64 {
        self.modes.values().map(|m| m.total_workflows).sum()
    }
}

impl ModeMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_workflows == 0 {
            0.0
        } else {
            (self.successful_workflows as f64 / self.total_workflows as f64) * 100.0
        }
    }
}
