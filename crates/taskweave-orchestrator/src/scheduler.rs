use crate::aggregator::{aggregate, AggregateContext, ExecutionResult};
use crate::config::OrchestratorConfig;
use crate::graph::DependencyGraph;
use crate::monitor::ExecutionMonitor;
use crate::resolver::{resolve, ResolveError};
use crate::trace::ExecutionTrace;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use taskweave_core::{FailureCause, SubtaskStatus, TaskweaveError, TaskweaveResult};
use taskweave_registry::{select_agent, AgentInputs, CapabilityRegistry};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A ready subtask with its inputs resolved once, reused by every attempt.
struct DispatchJob {
    id: String,
    capability: String,
    inputs: AgentInputs,
}

struct DispatchOutcome {
    result: Result<Value, FailureCause>,
    attempts: u32,
}

enum Attempt {
    Success(Value),
    /// Worth another try if the budget allows.
    Transient(FailureCause),
    /// Ends the subtask immediately.
    Fatal(FailureCause),
    Cancelled,
}

/// Drives one dependency graph to completion, generation by generation.
///
/// Every subtask of a generation is dispatched concurrently and the whole
/// generation settles before the next one is computed. A failed subtask
/// fails its transitive dependents; independent branches keep running.
pub struct Scheduler {
    registry: Arc<dyn CapabilityRegistry>,
    config: OrchestratorConfig,
    monitor: Arc<ExecutionMonitor>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn CapabilityRegistry>,
        config: OrchestratorConfig,
        monitor: Arc<ExecutionMonitor>,
    ) -> Self {
        Self {
            registry,
            config,
            monitor,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute `graph` and aggregate the outcome.
    ///
    /// Only [`TaskweaveError::InternalInvariantViolation`] is returned as an
    /// error; every per-subtask failure, cancellation included, ends up in
    /// the returned [`ExecutionResult`].
    pub async fn execute(
        &self,
        execution_id: Uuid,
        mut graph: DependencyGraph,
        cancel: CancellationToken,
    ) -> TaskweaveResult<ExecutionResult> {
        let started_at = Utc::now();
        let trace = ExecutionTrace::new();

        graph.break_cycles();
        let generations = graph.generations().inspect_err(|e| {
            error!(execution = %execution_id, error = %e, "Cannot layer graph");
        })?;

        info!(
            execution = %execution_id,
            subtasks = graph.len(),
            generations = generations.len(),
            "Starting execution"
        );

        let mut settled: HashSet<String> = HashSet::with_capacity(graph.len());
        let mut completed: HashMap<String, Value> = HashMap::new();
        let limit = self.config.max_parallel.map(Semaphore::new);
        let clock = Instant::now();
        let mut generation_index = 0usize;

        while settled.len() < graph.len() {
            if cancel.is_cancelled() {
                cancel_remaining(&mut graph, &trace, &mut settled);
                break;
            }

            let frontier = graph.next_generation(&settled);
            if frontier.is_empty() {
                let message = format!(
                    "No subtask can make progress with {} of {} settled",
                    settled.len(),
                    graph.len()
                );
                error!(execution = %execution_id, "{message}");
                return Err(TaskweaveError::InternalInvariantViolation(message));
            }

            debug!(
                execution = %execution_id,
                generation = generation_index,
                size = frontier.len(),
                "Scheduling generation"
            );

            let mut jobs = Vec::with_capacity(frontier.len());
            let mut failed = Vec::new();

            for id in &frontier {
                set_status(&mut graph, &trace, id, SubtaskStatus::Ready, None);
                let resolution = match graph.get(id) {
                    Some(task) => resolve(task, &completed, &graph),
                    None => continue,
                };
                match resolution {
                    Ok(inputs) => {
                        set_status(&mut graph, &trace, id, SubtaskStatus::Running, None);
                        let capability = graph
                            .get(id)
                            .map(|t| t.capability.clone())
                            .unwrap_or_default();
                        jobs.push(DispatchJob {
                            id: id.clone(),
                            capability,
                            inputs,
                        });
                    }
                    Err(ResolveError::Missing(cause)) => {
                        warn!(subtask = %id, cause = %cause, "Input resolution failed");
                        settle(&mut graph, &trace, id, Err(cause));
                        settled.insert(id.clone());
                        failed.push(id.clone());
                    }
                    Err(ResolveError::Fatal(err)) => {
                        error!(subtask = %id, error = %err, "Scheduling order violated");
                        return Err(err);
                    }
                }
            }

            let outcomes = join_all(
                jobs.iter()
                    .map(|job| self.dispatch(job, limit.as_ref(), &cancel)),
            )
            .await;

            for (job, outcome) in jobs.iter().zip(outcomes) {
                let outcome = outcome?;
                if let Some(task) = graph.get_mut(&job.id) {
                    task.set_attempt_count(outcome.attempts);
                }
                match &outcome.result {
                    Ok(value) => {
                        completed.insert(job.id.clone(), value.clone());
                    }
                    Err(FailureCause::Cancelled) => {}
                    Err(cause) => {
                        self.monitor.record_failure(&job.capability).await;
                        warn!(
                            subtask = %job.id,
                            attempts = outcome.attempts,
                            cause = %cause,
                            "Subtask failed"
                        );
                        failed.push(job.id.clone());
                    }
                }
                settle(&mut graph, &trace, &job.id, outcome.result);
                settled.insert(job.id.clone());
            }

            for ancestor in failed {
                propagate_failure(&mut graph, &trace, &mut settled, &ancestor);
            }
            generation_index += 1;
        }

        let duration = clock.elapsed();
        let result = aggregate(
            graph,
            AggregateContext {
                execution_id,
                started_at,
                duration,
                generations,
                trace: trace.into_events(),
            },
        );

        info!(
            execution = %execution_id,
            status = %result.status,
            completed = result.metrics.completed_count,
            failed = result.metrics.failed_count,
            duration_ms = result.duration_ms,
            "Execution finished"
        );
        Ok(result)
    }

    /// Run one subtask through the retry loop.
    ///
    /// Missing agents, registry errors, timeouts and retryable agent errors
    /// all spend the same `max_attempts` budget.
    async fn dispatch(
        &self,
        job: &DispatchJob,
        limit: Option<&Semaphore>,
        cancel: &CancellationToken,
    ) -> TaskweaveResult<DispatchOutcome> {
        let _permit = match limit {
            Some(semaphore) => tokio::select! {
                permit = semaphore.acquire() => Some(permit.map_err(|_| {
                    TaskweaveError::InternalInvariantViolation(
                        "Dispatch semaphore closed".to_string(),
                    )
                })?),
                _ = cancel.cancelled() => {
                    return Ok(DispatchOutcome {
                        result: Err(FailureCause::Cancelled),
                        attempts: 0,
                    });
                }
            },
            None => None,
        };

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(DispatchOutcome {
                    result: Err(FailureCause::Cancelled),
                    attempts,
                });
            }
            attempts += 1;

            let cause = match self.attempt(job, attempts, cancel).await {
                Attempt::Success(value) => {
                    return Ok(DispatchOutcome {
                        result: Ok(value),
                        attempts,
                    })
                }
                Attempt::Fatal(cause) => {
                    return Ok(DispatchOutcome {
                        result: Err(cause),
                        attempts,
                    })
                }
                Attempt::Cancelled => {
                    return Ok(DispatchOutcome {
                        result: Err(FailureCause::Cancelled),
                        attempts,
                    })
                }
                Attempt::Transient(cause) => cause,
            };

            if attempts >= self.config.max_attempts {
                warn!(
                    subtask = %job.id,
                    attempts,
                    cause = %cause,
                    "Retry budget exhausted"
                );
                return Ok(DispatchOutcome {
                    result: Err(cause),
                    attempts,
                });
            }

            let delay = self.config.retry.backoff(attempts - 1);
            self.monitor.record_retry(&job.capability).await;
            info!(
                subtask = %job.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %cause,
                "Retrying subtask dispatch"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Ok(DispatchOutcome {
                        result: Err(FailureCause::Cancelled),
                        attempts,
                    });
                }
            }
        }
    }

    async fn attempt(&self, job: &DispatchJob, attempt: u32, cancel: &CancellationToken) -> Attempt {
        let candidates = match self.registry.find_agents(&job.capability).await {
            Ok(candidates) => candidates,
            Err(e) => {
                return Attempt::Transient(FailureCause::AgentUnavailable {
                    message: format!("registry lookup failed: {e}"),
                })
            }
        };
        let Some(agent) = select_agent(&candidates) else {
            return Attempt::Transient(FailureCause::AgentUnavailable {
                message: format!("no available agent for capability '{}'", job.capability),
            });
        };

        debug!(subtask = %job.id, agent = %agent.id(), attempt, "Dispatching subtask");
        self.monitor.record_dispatch(&job.capability).await;

        let timeout = self.config.dispatch_timeout();
        let started = Instant::now();
        let call = tokio::time::timeout(timeout, self.registry.invoke(agent, &job.inputs));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Attempt::Cancelled,
            outcome = call => match outcome {
                Ok(Ok(value)) => {
                    self.monitor
                        .record_completion(&job.capability, started.elapsed().as_millis() as u64)
                        .await;
                    Attempt::Success(value)
                }
                Ok(Err(err)) if err.retryable => Attempt::Transient(FailureCause::AgentFailed {
                    message: err.message,
                }),
                Ok(Err(err)) => Attempt::Fatal(FailureCause::AgentFailed {
                    message: err.message,
                }),
                Err(_) => Attempt::Transient(FailureCause::AgentUnavailable {
                    message: format!(
                        "agent '{}' did not respond within {} ms",
                        agent.id(),
                        timeout.as_millis()
                    ),
                }),
            },
        }
    }
}

fn set_status(
    graph: &mut DependencyGraph,
    trace: &ExecutionTrace,
    id: &str,
    to: SubtaskStatus,
    detail: Option<String>,
) {
    if let Some(task) = graph.get_mut(id) {
        let from = task.status();
        task.transition(to);
        trace.record(id, from, to, task.attempt_count(), detail);
    }
}

fn settle(
    graph: &mut DependencyGraph,
    trace: &ExecutionTrace,
    id: &str,
    outcome: Result<Value, FailureCause>,
) {
    let Some(task) = graph.get_mut(id) else {
        return;
    };
    let from = task.status();
    let detail = match outcome {
        Ok(value) => {
            task.complete(value);
            None
        }
        Err(cause) => {
            let detail = cause.to_string();
            task.fail(cause);
            Some(detail)
        }
    };
    trace.record(id, from, task.status(), task.attempt_count(), detail);
}

/// Fail every not-yet-terminal transitive dependent of `ancestor`.
fn propagate_failure(
    graph: &mut DependencyGraph,
    trace: &ExecutionTrace,
    settled: &mut HashSet<String>,
    ancestor: &str,
) {
    for id in graph.descendants(ancestor) {
        let terminal = graph.get(&id).map(|t| t.status().is_terminal()).unwrap_or(true);
        if terminal {
            continue;
        }
        info!(subtask = %id, ancestor = %ancestor, "Skipping subtask after dependency failure");
        settle(
            graph,
            trace,
            &id,
            Err(FailureCause::DependencyFailed {
                ancestor: ancestor.to_string(),
            }),
        );
        settled.insert(id);
    }
}

fn cancel_remaining(
    graph: &mut DependencyGraph,
    trace: &ExecutionTrace,
    settled: &mut HashSet<String>,
) {
    let remaining: Vec<String> = graph
        .subtasks()
        .iter()
        .filter(|t| !t.status().is_terminal())
        .map(|t| t.id.clone())
        .collect();
    if !remaining.is_empty() {
        warn!(count = remaining.len(), "Execution cancelled; failing remaining subtasks");
    }
    for id in remaining {
        settle(graph, trace, &id, Err(FailureCause::Cancelled));
        settled.insert(id);
    }
}
