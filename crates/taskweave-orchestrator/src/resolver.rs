use crate::graph::DependencyGraph;
use crate::types::{InputValue, Subtask};
use serde_json::Value;
use std::collections::HashMap;
use taskweave_core::{FailureCause, TaskweaveError};
use taskweave_registry::AgentInputs;

/// Why inputs could not be resolved.
#[derive(Debug)]
pub enum ResolveError {
    /// The reference is illegal or its path is absent; fails only this subtask.
    Missing(FailureCause),
    /// A legal producer has no completed result, so the scheduler ran this
    /// subtask too early; aborts the execution.
    Fatal(TaskweaveError),
}

/// Rewrite the subtask's symbolic inputs into concrete values.
///
/// Literals pass through unchanged. A reference is legal only if its
/// producer is an ancestor of `subtask` in `graph`.
pub fn resolve(
    subtask: &Subtask,
    completed: &HashMap<String, Value>,
    graph: &DependencyGraph,
) -> Result<AgentInputs, ResolveError> {
    let mut resolved = AgentInputs::new();

    for (name, input) in subtask.inputs() {
        let value = match input {
            InputValue::Literal(value) => value.clone(),
            InputValue::Reference(reference) => {
                if !graph.is_ancestor(reference.producer(), &subtask.id) {
                    return Err(ResolveError::Missing(FailureCause::MissingReference {
                        reference: reference.raw().to_string(),
                        message: format!(
                            "'{}' is not an ancestor of '{}'",
                            reference.producer(),
                            subtask.id
                        ),
                    }));
                }
                let producer_result = completed.get(reference.producer()).ok_or_else(|| {
                    ResolveError::Fatal(TaskweaveError::InternalInvariantViolation(format!(
                        "Subtask '{}' became ready before producer '{}' completed",
                        subtask.id,
                        reference.producer()
                    )))
                })?;
                reference.resolve_against(producer_result).map_err(|message| {
                    ResolveError::Missing(FailureCause::MissingReference {
                        reference: reference.raw().to_string(),
                        message,
                    })
                })?
            }
        };
        resolved.insert(name.clone(), value);
    }

    Ok(resolved)
}
