//! Core types and error definitions for the Taskweave orchestration engine.
//!
//! This crate provides the foundational types shared across all Taskweave crates:
//! the top-level error enum, the per-subtask failure taxonomy, and the status
//! enums that drive the subtask and execution state machines.
//!
//! # Main types
//!
//! - [`TaskweaveError`]: Fatal errors that abort a whole execution.
//! - [`TaskweaveResult`]: Convenience alias for `Result<T, TaskweaveError>`.
//! - [`FailureCause`]: Why a single subtask ended up `failed`.
//! - [`SubtaskStatus`]: `pending → ready → running → {completed | failed}`.
//! - [`ExecutionStatus`]: Aggregate outcome of one task execution.

/// Error types.
pub mod error;
/// Subtask and execution status enums.
pub mod status;

pub use error::{FailureCause, TaskweaveError, TaskweaveResult};
pub use status::{ExecutionStatus, SubtaskStatus};
