//! Task decomposition and DAG orchestration for Taskweave.
//!
//! A task description is decomposed into a graph of subtasks, the graph is
//! cleaned of cycles and layered into generations, each generation is
//! dispatched concurrently to capability-matched agents, and the terminal
//! subtask states are aggregated into one execution result. A failing
//! subtask only takes down its own dependents.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Top-level engine: `run_task`, `cancel`, `plan`.
//! - [`Decomposer`]: Builds a [`DependencyGraph`] from a [`TaskDescription`].
//! - [`DependencyGraph`]: Cycle detection and breaking, layering, reachability.
//! - [`Scheduler`]: Generation-by-generation executor with retry and timeout.
//! - [`ExecutionResult`]: Aggregate outcome with per-subtask reports and trace.
//! - [`ExecutionMonitor`]: Per-capability metrics and execution history.

/// Result aggregation.
pub mod aggregator;
/// Orchestrator configuration.
pub mod config;
/// Task descriptions and decomposition strategies.
pub mod decomposer;
/// Top-level orchestration engine.
pub mod engine;
/// The dependency graph and its algorithms.
pub mod graph;
/// Execution metrics and history.
pub mod monitor;
/// Symbolic input resolution.
pub mod resolver;
/// Generation executor.
pub mod scheduler;
/// Execution trace of subtask transitions.
pub mod trace;
/// Subtasks, inputs and symbolic references.
pub mod types;

pub use aggregator::{aggregate, AggregateContext, ExecutionMetrics, ExecutionResult, SubtaskReport};
pub use config::{OrchestratorConfig, RetryPolicy};
pub use decomposer::{CacheStats, Decomposer, ExecutionPlan, StepSpec, TaskDescription};
pub use engine::Orchestrator;
pub use graph::{DependencyGraph, RemovedEdge};
pub use monitor::{CapabilityMetrics, ExecutionMonitor, ExecutionSummary};
pub use resolver::{resolve, ResolveError};
pub use scheduler::Scheduler;
pub use trace::{ExecutionTrace, TraceEvent};
pub use types::{InputValue, Subtask, SymbolicRef, REF_KEY};
