use crate::graph::{DependencyGraph, RemovedEdge};
use crate::trace::TraceEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use taskweave_core::{ExecutionStatus, FailureCause, SubtaskStatus};
use uuid::Uuid;

/// Terminal state of one subtask as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub id: String,
    pub capability: String,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureCause>,
    pub attempts: u32,
    pub depends_on: Vec<String>,
}

/// Summary metrics of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// `completed_count / total`, or `1.0` for an empty graph.
    pub success_rate: f64,
    pub failed_subtask_ids: Vec<String>,
    /// Wall clock from the first dispatch to the last terminal transition.
    pub total_duration_ms: u64,
}

/// Final outcome of one task execution. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    /// Each completed subtask's result under its id; failed subtasks
    /// contribute `{"error": <cause>}` in the same slot.
    pub result: Map<String, Value>,
    pub subtasks: Vec<SubtaskReport>,
    pub metrics: ExecutionMetrics,
    pub generations: Vec<Vec<String>>,
    pub removed_edges: Vec<RemovedEdge>,
    pub trace: Vec<TraceEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn subtask(&self, id: &str) -> Option<&SubtaskReport> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Execution facts the aggregator cannot derive from the graph itself.
#[derive(Debug, Clone)]
pub struct AggregateContext {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub generations: Vec<Vec<String>>,
    pub trace: Vec<TraceEvent>,
}

/// Merge terminal subtask states into one [`ExecutionResult`].
///
/// An empty graph is `completed`. Otherwise the status is `completed` when
/// every subtask completed, `failed` when every subtask failed and
/// `partial` in between.
pub fn aggregate(graph: DependencyGraph, context: AggregateContext) -> ExecutionResult {
    let removed_edges = graph.removed_edges().to_vec();
    let subtasks = graph.into_subtasks();
    let total = subtasks.len();

    let mut result = Map::new();
    let mut reports = Vec::with_capacity(total);
    let mut failed_subtask_ids = Vec::new();
    let mut completed_count = 0;

    for task in subtasks {
        match task.status() {
            SubtaskStatus::Completed => {
                completed_count += 1;
                result.insert(
                    task.id.clone(),
                    task.result().cloned().unwrap_or(Value::Null),
                );
            }
            SubtaskStatus::Failed => {
                failed_subtask_ids.push(task.id.clone());
                result.insert(task.id.clone(), json!({ "error": task.error() }));
            }
            _ => {}
        }
        reports.push(SubtaskReport {
            id: task.id.clone(),
            capability: task.capability.clone(),
            status: task.status(),
            result: task.result().cloned(),
            error: task.error().cloned(),
            attempts: task.attempt_count(),
            depends_on: task.depends_on().iter().cloned().collect(),
        });
    }

    let failed_count = failed_subtask_ids.len();
    let status = if completed_count == total {
        ExecutionStatus::Completed
    } else if failed_count == total {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Partial
    };
    let success_rate = if total == 0 {
        1.0
    } else {
        completed_count as f64 / total as f64
    };

    let duration_ms = context.duration.as_millis() as u64;
    let finished_at = context.started_at
        + chrono::Duration::from_std(context.duration).unwrap_or_else(|_| chrono::Duration::zero());

    ExecutionResult {
        execution_id: context.execution_id,
        status,
        duration_ms,
        result,
        subtasks: reports,
        metrics: ExecutionMetrics {
            total,
            completed_count,
            failed_count,
            success_rate,
            failed_subtask_ids,
            total_duration_ms: duration_ms,
        },
        generations: context.generations,
        removed_edges,
        trace: context.trace,
        started_at: context.started_at,
        finished_at,
    }
}
