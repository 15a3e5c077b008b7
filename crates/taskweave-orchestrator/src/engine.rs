use crate::aggregator::ExecutionResult;
use crate::config::OrchestratorConfig;
use crate::decomposer::{Decomposer, ExecutionPlan, TaskDescription};
use crate::graph::DependencyGraph;
use crate::monitor::ExecutionMonitor;
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use taskweave_core::{TaskweaveError, TaskweaveResult};
use taskweave_registry::CapabilityRegistry;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

type ActiveExecutions = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// The orchestration engine.
/// Implements the decompose → schedule → aggregate pipeline.
pub struct Orchestrator {
    decomposer: Decomposer,
    scheduler: Scheduler,
    monitor: Arc<ExecutionMonitor>,
    active: ActiveExecutions,
}

impl Orchestrator {
    /// Create an orchestrator over an injected registry.
    pub fn new(
        registry: Arc<dyn CapabilityRegistry>,
        config: OrchestratorConfig,
    ) -> TaskweaveResult<Self> {
        config.validate()?;
        let monitor = Arc::new(ExecutionMonitor::new(config.history_limit));
        Ok(Self {
            decomposer: Decomposer::new(config.cache_capacity),
            scheduler: Scheduler::new(registry, config, monitor.clone()),
            monitor,
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Get a reference to the monitor.
    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    pub fn decomposer(&self) -> &Decomposer {
        &self.decomposer
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.scheduler.config()
    }

    /// Decompose and run a task under a fresh execution id.
    pub async fn run_task(&self, description: &TaskDescription) -> TaskweaveResult<ExecutionResult> {
        self.run_task_with_id(Uuid::new_v4(), description).await
    }

    /// Decompose and run a task under a caller-chosen id, so the caller can
    /// [`cancel`](Self::cancel) it from elsewhere.
    ///
    /// Returns `Err` only for a malformed description or an internal
    /// invariant violation.
    pub async fn run_task_with_id(
        &self,
        execution_id: Uuid,
        description: &TaskDescription,
    ) -> TaskweaveResult<ExecutionResult> {
        info!(execution = %execution_id, shape = description.shape(), "Running task");
        let graph = self.decomposer.decompose(description)?;
        self.execute_graph(execution_id, graph).await
    }

    /// Run an already-built graph.
    pub async fn execute_graph(
        &self,
        execution_id: Uuid,
        graph: DependencyGraph,
    ) -> TaskweaveResult<ExecutionResult> {
        let token = CancellationToken::new();
        let _guard = ActiveGuard::enter(&self.active, execution_id, token.clone())?;

        self.monitor.start_execution(execution_id).await;
        match self.scheduler.execute(execution_id, graph, token).await {
            Ok(result) => {
                self.monitor.finish_execution(&result).await;
                Ok(result)
            }
            Err(e) => {
                self.monitor.abort_execution(execution_id).await;
                Err(e)
            }
        }
    }

    /// Signal cancellation to a running execution. Returns `false` if no
    /// execution with that id is running.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.active.lock().get(&execution_id) {
            Some(token) => {
                info!(execution = %execution_id, "Cancelling execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of executions currently running.
    pub fn active_executions(&self) -> Vec<Uuid> {
        self.active.lock().keys().copied().collect()
    }

    /// Preview generations and removed edges without dispatching.
    pub fn plan(&self, description: &TaskDescription) -> TaskweaveResult<ExecutionPlan> {
        self.decomposer.plan(description)
    }
}

/// Keeps an execution's token registered for as long as it runs.
struct ActiveGuard {
    active: ActiveExecutions,
    execution_id: Uuid,
}

impl ActiveGuard {
    fn enter(
        active: &ActiveExecutions,
        execution_id: Uuid,
        token: CancellationToken,
    ) -> TaskweaveResult<Self> {
        let mut map = active.lock();
        if map.contains_key(&execution_id) {
            return Err(TaskweaveError::Config(format!(
                "Execution {execution_id} is already running"
            )));
        }
        map.insert(execution_id, token);
        Ok(Self {
            active: active.clone(),
            execution_id,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.execution_id);
    }
}
