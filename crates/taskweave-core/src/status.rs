use serde::{Deserialize, Serialize};

/// Lifecycle state of one subtask.
///
/// Created `Pending` by the decomposer, `Ready` once every dependency is
/// `Completed`, `Running` while dispatched, then terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
}

impl SubtaskStatus {
    /// `Completed` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtaskStatus::Pending => write!(f, "pending"),
            SubtaskStatus::Ready => write!(f, "ready"),
            SubtaskStatus::Running => write!(f, "running"),
            SubtaskStatus::Completed => write!(f, "completed"),
            SubtaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate outcome of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Every subtask completed, or there were no subtasks at all.
    Completed,
    /// Some subtasks completed and some failed.
    Partial,
    /// Every subtask failed.
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Partial => write!(f, "partial"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SubtaskStatus::Pending.is_terminal());
        assert!(!SubtaskStatus::Ready.is_terminal());
        assert!(!SubtaskStatus::Running.is_terminal());
        assert!(SubtaskStatus::Completed.is_terminal());
        assert!(SubtaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SubtaskStatus::Running.to_string(), "running");
        assert_eq!(ExecutionStatus::Partial.to_string(), "partial");
    }
}
