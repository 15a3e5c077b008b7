use crate::aggregator::ExecutionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use taskweave_core::ExecutionStatus;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Dispatch counters for one capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMetrics {
    pub capability: String,
    /// Agent invocations started, retries included.
    pub dispatches: u64,
    pub retries: u64,
    pub completions: u64,
    pub failures: u64,
    /// Cumulative time spent in successful invocations.
    pub duration_ms: u64,
}

/// Condensed record of a finished execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl From<&ExecutionResult> for ExecutionSummary {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            execution_id: result.execution_id,
            status: result.status,
            total: result.metrics.total,
            completed: result.metrics.completed_count,
            failed: result.metrics.failed_count,
            success_rate: result.metrics.success_rate,
            duration_ms: result.duration_ms,
            finished_at: result.finished_at,
        }
    }
}

#[derive(Default)]
struct MonitorState {
    capabilities: HashMap<String, CapabilityMetrics>,
    running: HashSet<Uuid>,
    history: VecDeque<ExecutionSummary>,
}

/// Tracks per-capability metrics and a bounded history of executions.
///
/// Shared by every execution of one orchestrator. Nothing is persisted.
pub struct ExecutionMonitor {
    state: Arc<RwLock<MonitorState>>,
    history_limit: usize,
}

impl ExecutionMonitor {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
            history_limit,
        }
    }

    /// Mark an execution as running.
    pub async fn start_execution(&self, execution_id: Uuid) {
        self.state.write().await.running.insert(execution_id);
    }

    /// Mark an execution as finished and append it to the history.
    pub async fn finish_execution(&self, result: &ExecutionResult) {
        let mut state = self.state.write().await;
        state.running.remove(&result.execution_id);
        if self.history_limit == 0 {
            return;
        }
        while state.history.len() >= self.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(ExecutionSummary::from(result));
    }

    /// Forget a running execution that aborted without a result.
    pub async fn abort_execution(&self, execution_id: Uuid) {
        self.state.write().await.running.remove(&execution_id);
    }

    pub async fn record_dispatch(&self, capability: &str) {
        self.with_capability(capability, |m| m.dispatches += 1).await;
    }

    pub async fn record_retry(&self, capability: &str) {
        self.with_capability(capability, |m| m.retries += 1).await;
    }

    pub async fn record_completion(&self, capability: &str, duration_ms: u64) {
        self.with_capability(capability, |m| {
            m.completions += 1;
            m.duration_ms += duration_ms;
        })
        .await;
    }

    pub async fn record_failure(&self, capability: &str) {
        self.with_capability(capability, |m| m.failures += 1).await;
    }

    async fn with_capability(&self, capability: &str, update: impl FnOnce(&mut CapabilityMetrics)) {
        let mut state = self.state.write().await;
        let metrics = state
            .capabilities
            .entry(capability.to_string())
            .or_insert_with(|| CapabilityMetrics {
                capability: capability.to_string(),
                ..Default::default()
            });
        update(metrics);
    }

    /// Metrics of every capability seen so far, ordered by name.
    pub async fn snapshot(&self) -> Vec<CapabilityMetrics> {
        let state = self.state.read().await;
        let mut metrics: Vec<CapabilityMetrics> = state.capabilities.values().cloned().collect();
        metrics.sort_by(|a, b| a.capability.cmp(&b.capability));
        metrics
    }

    pub async fn get_capability(&self, capability: &str) -> Option<CapabilityMetrics> {
        self.state.read().await.capabilities.get(capability).cloned()
    }

    /// Finished executions, oldest first.
    pub async fn history(&self) -> Vec<ExecutionSummary> {
        self.state.read().await.history.iter().cloned().collect()
    }

    pub async fn running_count(&self) -> usize {
        self.state.read().await.running.len()
    }

    /// Totals across all capabilities.
    pub async fn aggregate_metrics(&self) -> CapabilityMetrics {
        let state = self.state.read().await;
        let mut total = CapabilityMetrics {
            capability: "*".to_string(),
            ..Default::default()
        };
        for metrics in state.capabilities.values() {
            total.dispatches += metrics.dispatches;
            total.retries += metrics.retries;
            total.completions += metrics.completions;
            total.failures += metrics.failures;
            total.duration_ms += metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON for dashboards.
    pub async fn to_json(&self) -> serde_json::Value {
        let capabilities = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        let history = self.history().await;
        let running = self.running_count().await;
        serde_json::json!({
            "capabilities": capabilities,
            "aggregate": aggregate,
            "running": running,
            "history": history,
        })
    }
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new(100)
    }
}
