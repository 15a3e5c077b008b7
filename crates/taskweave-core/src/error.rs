use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`TaskweaveError`].
pub type TaskweaveResult<T> = Result<T, TaskweaveError>;

/// Top-level error type for the Taskweave engine.
///
/// Only [`TaskweaveError::MalformedGraph`] and
/// [`TaskweaveError::InternalInvariantViolation`] ever escape a task run;
/// every other failure is isolated to a subtask and reported through
/// [`FailureCause`] inside a well-formed execution result.
#[derive(Error, Debug)]
pub enum TaskweaveError {
    /// Dangling dependency, duplicate id, or unsupported decomposition shape.
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    /// The graph algorithms reached a state that cycle-breaking should have
    /// made impossible.
    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// An error raised by a capability registry.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskweaveError {
    /// Whether this error aborts the whole execution.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TaskweaveError::MalformedGraph(_) | TaskweaveError::InternalInvariantViolation(_)
        )
    }
}

/// Why a subtask reached the terminal `failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// No agent matched the capability, or the selected agent timed out,
    /// on every attempt of the retry budget.
    AgentUnavailable { message: String },
    /// The agent returned an error that was not retryable, or stayed
    /// retryable until the budget ran out.
    AgentFailed { message: String },
    /// A symbolic input did not resolve against the producer's result.
    MissingReference { reference: String, message: String },
    /// An ancestor failed, so this subtask was never dispatched.
    DependencyFailed { ancestor: String },
    /// The execution was cancelled before this subtask finished.
    Cancelled,
}

impl FailureCause {
    /// Short machine-readable tag, matching the serialized `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::AgentUnavailable { .. } => "agent_unavailable",
            FailureCause::AgentFailed { .. } => "agent_failed",
            FailureCause::MissingReference { .. } => "missing_reference",
            FailureCause::DependencyFailed { .. } => "dependency_failed",
            FailureCause::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::AgentUnavailable { message } => {
                write!(f, "agent unavailable: {message}")
            }
            FailureCause::AgentFailed { message } => write!(f, "agent failed: {message}"),
            FailureCause::MissingReference { reference, message } => {
                write!(f, "missing reference '{reference}': {message}")
            }
            FailureCause::DependencyFailed { ancestor } => {
                write!(f, "dependency '{ancestor}' failed")
            }
            FailureCause::Cancelled => write!(f, "cancelled"),
        }
    }
}
