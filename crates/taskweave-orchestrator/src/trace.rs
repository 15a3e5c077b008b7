use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskweave_core::SubtaskStatus;
use tracing::debug;

/// One subtask state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub subtask_id: String,
    pub from: SubtaskStatus,
    pub to: SubtaskStatus,
    /// Dispatch attempts made so far; zero for subtasks never dispatched.
    pub attempt: u32,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append-only log of transitions for one execution.
///
/// The engine only emits the trace; persisting it is up to the caller.
#[derive(Debug, Default)]
pub struct ExecutionTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        subtask_id: &str,
        from: SubtaskStatus,
        to: SubtaskStatus,
        attempt: u32,
        detail: Option<String>,
    ) {
        debug!(
            subtask = %subtask_id,
            %from,
            %to,
            attempt,
            detail = detail.as_deref().unwrap_or(""),
            "Subtask transition"
        );
        self.events.lock().push(TraceEvent {
            subtask_id: subtask_id.to_string(),
            from,
            to,
            attempt,
            at: Utc::now(),
            detail,
        });
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events.into_inner()
    }
}
