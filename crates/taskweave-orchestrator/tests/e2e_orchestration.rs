//! End-to-end orchestration tests.
//!
//! Drives `Orchestrator::run_task` against an in-memory registry of scripted
//! agents. Checks: generation ordering, partial-failure isolation, retry
//! budgets, timeouts, cancellation and cycle-breaking.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::{ExecutionStatus, FailureCause, SubtaskStatus, TaskweaveError};
use taskweave_orchestrator::*;
use taskweave_registry::{Agent, AgentDescriptor, AgentError, AgentInputs, AgentRegistry};
use tokio::sync::Notify;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Behavior {
    /// Return this value.
    Reply(Value),
    /// Return `{"agent": id, "inputs": inputs}`.
    Echo,
    /// Fail with this error on every call.
    Fail(AgentError),
    /// Fail transiently this many times, then echo.
    Flaky(u32),
    /// Signal `started`, then never answer.
    Hang(Arc<Notify>),
}

/// Shared dispatch log: agent ids in call order.
type CallLog = Arc<Mutex<Vec<String>>>;

struct ScriptedAgent {
    descriptor: AgentDescriptor,
    behavior: Behavior,
    failures: AtomicU32,
    calls: Mutex<Vec<AgentInputs>>,
    log: CallLog,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, inputs: &AgentInputs) -> Result<Value, AgentError> {
        self.calls.lock().push(inputs.clone());
        self.log.lock().push(self.descriptor.id.clone());

        match &self.behavior {
            Behavior::Reply(value) => Ok(value.clone()),
            Behavior::Echo => Ok(json!({ "agent": self.descriptor.id, "inputs": inputs })),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Flaky(times) => {
                if self.failures.fetch_add(1, Ordering::SeqCst) < *times {
                    Err(AgentError::transient("warming up"))
                } else {
                    Ok(json!({ "agent": self.descriptor.id, "inputs": inputs }))
                }
            }
            Behavior::Hang(started) => {
                started.notify_one();
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
        }
    }
}

struct Harness {
    registry: Arc<AgentRegistry>,
    agents: Vec<Arc<ScriptedAgent>>,
    log: CallLog,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new()),
            agents: Vec::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn agent(mut self, id: &str, capability: &str, affinity: i32, behavior: Behavior) -> Self {
        let agent = Arc::new(ScriptedAgent {
            descriptor: AgentDescriptor::new(id, vec![capability.to_string()])
                .with_affinity(affinity),
            behavior,
            failures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            log: self.log.clone(),
        });
        self.registry.register(agent.clone()).unwrap();
        self.agents.push(agent);
        self
    }

    fn calls(&self, id: &str) -> Vec<AgentInputs> {
        self.agents
            .iter()
            .find(|a| a.descriptor.id == id)
            .map(|a| a.calls.lock().clone())
            .unwrap_or_default()
    }

    fn dispatch_order(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(self.registry.clone(), config).unwrap()
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy::immediate(),
        ..Default::default()
    }
}

fn task(value: Value) -> TaskDescription {
    serde_json::from_value(value).unwrap()
}

fn error_of(result: &ExecutionResult, id: &str) -> FailureCause {
    result.subtask(id).unwrap().error.clone().unwrap()
}

// ---------------------------------------------------------------------------
// Linear pipeline
// ---------------------------------------------------------------------------

fn etl_pipeline() -> TaskDescription {
    task(json!({
        "shape": "pipeline",
        "steps": [
            {"id": "extract", "capability": "read", "inputs": {"path": "/data/events.csv"}},
            {"id": "transform", "capability": "map", "inputs": {"rows": {"$ref": "extract.result.rows"}}},
            {"id": "load", "capability": "write", "inputs": {"rows": {"$ref": "transform.inputs.rows"}}},
            {"id": "validate", "capability": "check", "inputs": {"report": {"$ref": "load"}}}
        ]
    }))
}

#[tokio::test]
async fn test_pipeline_runs_in_order() {
    let h = Harness::new()
        .agent("reader", "read", 0, Behavior::Reply(json!({"rows": [1, 2, 3]})))
        .agent("mapper", "map", 0, Behavior::Echo)
        .agent("writer", "write", 0, Behavior::Reply(json!({"written": 3})))
        .agent("checker", "check", 0, Behavior::Echo);

    let result = h.orchestrator(fast_config()).run_task(&etl_pipeline()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.generations.len(), 4);
    assert!(result.generations.iter().all(|g| g.len() == 1));
    assert_eq!(h.dispatch_order(), vec!["reader", "mapper", "writer", "checker"]);

    // Both reference spellings reach the same value.
    assert_eq!(h.calls("mapper")[0]["rows"], json!([1, 2, 3]));
    assert_eq!(h.calls("writer")[0]["rows"], json!([1, 2, 3]));
    assert_eq!(h.calls("checker")[0]["report"], json!({"written": 3}));
    assert_eq!(result.metrics.success_rate, 1.0);
}

#[tokio::test]
async fn test_pipeline_failure_skips_dependents() {
    let h = Harness::new()
        .agent("reader", "read", 0, Behavior::Reply(json!({"rows": [1, 2, 3]})))
        .agent("mapper", "map", 0, Behavior::Echo)
        .agent("writer", "write", 0, Behavior::Fail(AgentError::fatal("disk full")))
        .agent("checker", "check", 0, Behavior::Echo);

    let result = h.orchestrator(fast_config()).run_task(&etl_pipeline()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.metrics.success_rate, 0.5);
    assert_eq!(result.metrics.failed_subtask_ids, vec!["load", "validate"]);
    assert_eq!(h.dispatch_order(), vec!["reader", "mapper", "writer"]);
    assert!(h.calls("checker").is_empty());

    assert_eq!(
        error_of(&result, "load"),
        FailureCause::AgentFailed {
            message: "disk full".into()
        }
    );
    assert_eq!(result.subtask("load").unwrap().attempts, 1);
    assert_eq!(
        error_of(&result, "validate"),
        FailureCause::DependencyFailed {
            ancestor: "load".into()
        }
    );
    assert_eq!(result.subtask("validate").unwrap().attempts, 0);
    assert_eq!(result.result["validate"]["error"]["kind"], "dependency_failed");
}

#[tokio::test]
async fn test_missing_reference_fails_only_its_branch() {
    let h = Harness::new()
        .agent("reader", "read", 0, Behavior::Reply(json!({"rows": [1]})))
        .agent("mapper", "map", 0, Behavior::Echo)
        .agent("audit", "audit", 0, Behavior::Echo);

    let desc = task(json!({
        "shape": "graph",
        "subtasks": [
            {"id": "extract", "capability": "read"},
            {"id": "transform", "capability": "map", "inputs": {"row": {"$ref": "extract.rows.5"}}},
            {"id": "report", "capability": "map", "inputs": {"x": {"$ref": "transform.agent"}}},
            {"id": "audit", "capability": "audit", "inputs": {"rows": {"$ref": "extract.rows"}}}
        ]
    }));
    let result = h.orchestrator(fast_config()).run_task(&desc).await.unwrap();

    assert!(matches!(
        error_of(&result, "transform"),
        FailureCause::MissingReference { ref reference, .. } if reference == "extract.rows.5"
    ));
    assert_eq!(result.subtask("transform").unwrap().attempts, 0);
    assert_eq!(
        error_of(&result, "report"),
        FailureCause::DependencyFailed {
            ancestor: "transform".into()
        }
    );
    assert!(h.calls("mapper").is_empty());
    assert_eq!(result.subtask("audit").unwrap().status, SubtaskStatus::Completed);
    assert_eq!(result.status, ExecutionStatus::Partial);
}

// ---------------------------------------------------------------------------
// Fan-out / fan-in
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fan_out_one_branch_fails() {
    let h = Harness::new()
        .agent("splitter", "split", 0, Behavior::Reply(json!({"chunk": "abc"})))
        .agent("gzip", "gzip", 0, Behavior::Echo)
        .agent("zstd", "zstd", 0, Behavior::Echo)
        .agent("brotli", "brotli", 0, Behavior::Fail(AgentError::fatal("unsupported level")))
        .agent("compare", "compare", 0, Behavior::Echo);

    let desc = task(json!({
        "shape": "fan_out",
        "source": {"capability": "split"},
        "branches": [
            {"capability": "gzip", "inputs": {"data": {"$ref": "source.chunk"}}},
            {"capability": "zstd", "inputs": {"data": {"$ref": "source.chunk"}}},
            {"capability": "brotli", "inputs": {"data": {"$ref": "source.chunk"}}}
        ],
        "join": {"capability": "compare"}
    }));
    let result = h.orchestrator(fast_config()).run_task(&desc).await.unwrap();

    assert_eq!(result.generations.len(), 3);
    assert_eq!(result.generations[0], vec!["source"]);
    let mut middle = result.generations[1].clone();
    middle.sort();
    assert_eq!(middle, vec!["branch-0", "branch-1", "branch-2"]);
    assert_eq!(result.generations[2], vec!["join"]);

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(
        error_of(&result, "join"),
        FailureCause::DependencyFailed {
            ancestor: "branch-2".into()
        }
    );
    assert!(h.calls("compare").is_empty());
    assert_eq!(result.result["branch-0"]["inputs"]["data"], "abc");
    assert_eq!(result.result["branch-1"]["agent"], "zstd");
    assert_eq!(result.metrics.completed_count, 3);
}

// ---------------------------------------------------------------------------
// Empty tasks and malformed input
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_task_is_completed() {
    let h = Harness::new();
    let result = h
        .orchestrator(fast_config())
        .run_task(&task(json!({"shape": "pipeline", "steps": []})))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.metrics.total, 0);
    assert!(result.result.is_empty());
    assert!(h.dispatch_order().is_empty());
}

#[tokio::test]
async fn test_dangling_reference_is_fatal() {
    let h = Harness::new().agent("mapper", "map", 0, Behavior::Echo);
    let desc = task(json!({
        "shape": "graph",
        "subtasks": [{"id": "a", "capability": "map", "inputs": {"x": {"$ref": "ghost.v"}}}]
    }));
    let err = h.orchestrator(fast_config()).run_task(&desc).await.unwrap_err();
    assert!(matches!(err, TaskweaveError::MalformedGraph(_)));
    assert!(h.dispatch_order().is_empty());
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transient_errors_retry_with_identical_inputs() {
    let h = Harness::new()
        .agent("reader", "read", 0, Behavior::Reply(json!({"rows": [7]})))
        .agent("flaky", "map", 0, Behavior::Flaky(2));

    let desc = task(json!({
        "shape": "pipeline",
        "steps": [
            {"id": "extract", "capability": "read"},
            {"id": "transform", "capability": "map", "inputs": {"rows": {"$ref": "extract.rows"}, "mode": "fast"}}
        ]
    }));
    let result = h.orchestrator(fast_config()).run_task(&desc).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.subtask("transform").unwrap().attempts, 3);
    let calls = h.calls("flaky");
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| *c == calls[0]));
    assert_eq!(calls[0]["rows"], json!([7]));
}

#[tokio::test]
async fn test_retryable_error_exhausts_budget() {
    let h = Harness::new().agent(
        "busy",
        "map",
        0,
        Behavior::Fail(AgentError::transient("rate limited")),
    );
    let config = OrchestratorConfig {
        max_attempts: 4,
        ..fast_config()
    };
    let result = h
        .orchestrator(config)
        .run_task(&task(json!({"shape": "atomic", "capability": "map"})))
        .await
        .unwrap();

    assert_eq!(h.calls("busy").len(), 4);
    assert_eq!(result.subtask("map").unwrap().attempts, 4);
    assert_eq!(
        error_of(&result, "map"),
        FailureCause::AgentFailed {
            message: "rate limited".into()
        }
    );
    assert_eq!(result.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_no_agent_is_retried_then_unavailable() {
    let h = Harness::new().agent("other", "read", 0, Behavior::Echo);
    let config = OrchestratorConfig {
        max_attempts: 2,
        ..fast_config()
    };
    let orch = h.orchestrator(config);
    let result = orch
        .run_task(&task(json!({"shape": "atomic", "capability": "compress"})))
        .await
        .unwrap();

    let report = result.subtask("compress").unwrap();
    assert_eq!(report.attempts, 2);
    assert!(matches!(
        report.error,
        Some(FailureCause::AgentUnavailable { .. })
    ));
    assert!(h.dispatch_order().is_empty());

    let metrics = orch.monitor().get_capability("compress").await.unwrap();
    assert_eq!(metrics.retries, 1);
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.dispatches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout_is_transient() {
    let started = Arc::new(Notify::new());
    let h = Harness::new().agent("stuck", "map", 0, Behavior::Hang(started));
    let config = OrchestratorConfig {
        max_attempts: 2,
        dispatch_timeout_ms: 1_000,
        ..fast_config()
    };
    let result = h
        .orchestrator(config)
        .run_task(&task(json!({"shape": "atomic", "capability": "map"})))
        .await
        .unwrap();

    assert_eq!(h.calls("stuck").len(), 2);
    match error_of(&result, "map") {
        FailureCause::AgentUnavailable { message } => assert!(message.contains("1000 ms")),
        other => panic!("unexpected cause: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Agent selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_highest_affinity_available_agent_is_selected() {
    let h = Harness::new()
        .agent("a-low", "map", 1, Behavior::Echo)
        .agent("b-high", "map", 5, Behavior::Echo)
        .agent("c-high", "map", 5, Behavior::Echo);
    let desc = task(json!({"shape": "atomic", "capability": "map"}));

    let orch = h.orchestrator(fast_config());
    orch.run_task(&desc).await.unwrap();
    assert_eq!(h.dispatch_order(), vec!["b-high"]);

    h.registry.set_available("b-high", false);
    orch.run_task(&desc).await.unwrap();
    assert_eq!(h.dispatch_order(), vec!["b-high", "c-high"]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_running_execution() {
    let started = Arc::new(Notify::new());
    let h = Harness::new()
        .agent("stuck", "read", 0, Behavior::Hang(started.clone()))
        .agent("mapper", "map", 0, Behavior::Echo);
    let orch = Arc::new(h.orchestrator(OrchestratorConfig::default()));

    let desc = task(json!({
        "shape": "pipeline",
        "steps": [
            {"id": "extract", "capability": "read"},
            {"id": "transform", "capability": "map", "inputs": {"rows": {"$ref": "extract.rows"}}}
        ]
    }));
    let id = Uuid::new_v4();
    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.run_task_with_id(id, &desc).await })
    };

    started.notified().await;
    assert_eq!(orch.active_executions(), vec![id]);
    assert!(orch.cancel(id));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(result.execution_id, id);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(error_of(&result, "extract"), FailureCause::Cancelled);
    assert_eq!(error_of(&result, "transform"), FailureCause::Cancelled);
    assert!(h.calls("mapper").is_empty());
    assert!(orch.active_executions().is_empty());
    assert!(!orch.cancel(id));
}

// ---------------------------------------------------------------------------
// Cycle breaking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cyclic_graph_is_broken_and_runs() {
    let h = Harness::new().agent("worker", "work", 0, Behavior::Echo);
    let desc = task(json!({
        "shape": "graph",
        "subtasks": [
            {"id": "a", "capability": "work", "depends_on": ["c"]},
            {"id": "b", "capability": "work", "depends_on": ["a"]},
            {"id": "c", "capability": "work", "depends_on": ["b"]}
        ]
    }));
    let orch = h.orchestrator(fast_config());

    let plan = orch.plan(&desc).unwrap();
    let result = orch.run_task(&desc).await.unwrap();

    assert_eq!(
        result.removed_edges,
        vec![RemovedEdge {
            dependent: "c".into(),
            dependency: "b".into()
        }]
    );
    assert_eq!(plan.removed_edges, result.removed_edges);
    assert_eq!(plan.generations, result.generations);
    assert_eq!(result.generations, vec![vec!["c"], vec!["a"], vec!["b"]]);
    assert_eq!(result.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_severed_reference_fails_with_missing_reference() {
    let h = Harness::new().agent("worker", "work", 0, Behavior::Echo);
    let desc = task(json!({
        "shape": "graph",
        "subtasks": [
            {"id": "a", "capability": "work", "inputs": {"x": {"$ref": "b.agent"}}},
            {"id": "b", "capability": "work", "inputs": {"x": {"$ref": "a.agent"}}}
        ]
    }));
    let result = h.orchestrator(fast_config()).run_task(&desc).await.unwrap();

    assert!(matches!(
        error_of(&result, "b"),
        FailureCause::MissingReference { .. }
    ));
    assert_eq!(
        error_of(&result, "a"),
        FailureCause::DependencyFailed {
            ancestor: "b".into()
        }
    );
    assert!(h.dispatch_order().is_empty());
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_monitor_tracks_history_and_metrics() {
    let h = Harness::new()
        .agent("reader", "read", 0, Behavior::Reply(json!({"rows": []})))
        .agent("mapper", "map", 0, Behavior::Echo)
        .agent("writer", "write", 0, Behavior::Echo)
        .agent("checker", "check", 0, Behavior::Echo);
    let orch = h.orchestrator(fast_config());

    orch.run_task(&etl_pipeline()).await.unwrap();
    orch.run_task(&etl_pipeline()).await.unwrap();

    let history = orch.monitor().history().await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.status == ExecutionStatus::Completed));
    assert_eq!(orch.decomposer().cache_stats().hits, 1);

    let read = orch.monitor().get_capability("read").await.unwrap();
    assert_eq!(read.dispatches, 2);
    assert_eq!(read.completions, 2);
    let json = orch.monitor().to_json().await;
    assert_eq!(json["aggregate"]["dispatches"], 8);
}
