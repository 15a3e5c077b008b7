use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Concrete inputs handed to an agent after symbolic references are resolved.
pub type AgentInputs = serde_json::Map<String, serde_json::Value>;

/// Metadata describing an agent and what it can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub description: String,
    pub capabilities: Vec<String>,
    /// Higher affinity wins when several agents serve the same capability.
    #[serde(default)]
    pub affinity: i32,
}

impl AgentDescriptor {
    /// Create a descriptor with zero affinity and no description.
    pub fn new(id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            capabilities,
            affinity: 0,
        }
    }

    /// Set the selection affinity.
    pub fn with_affinity(mut self, affinity: i32) -> Self {
        self.affinity = affinity;
        self
    }

    /// Set the human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this agent advertises `capability`.
    pub fn serves(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Error returned by an agent invocation.
///
/// The agent decides whether the failure is transient; the scheduler only
/// retries errors tagged `retryable`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
    pub retryable: bool,
}

impl AgentError {
    /// A failure that retrying will not fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A transient failure worth another attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Trait every agent family implements.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    async fn invoke(&self, inputs: &AgentInputs) -> Result<serde_json::Value, AgentError>;
}

/// Cloneable handle to a registered agent.
///
/// All clones share one in-flight counter, so the load seen by the selection
/// tie-break reflects every execution using this agent.
#[derive(Clone)]
pub struct AgentHandle {
    agent: Arc<dyn Agent>,
    in_flight: Arc<AtomicUsize>,
}

impl AgentHandle {
    /// Wrap an agent in a fresh handle.
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The agent's descriptor.
    pub fn descriptor(&self) -> &AgentDescriptor {
        self.agent.descriptor()
    }

    /// The agent's unique id.
    pub fn id(&self) -> &str {
        &self.agent.descriptor().id
    }

    /// The agent's advertised affinity.
    pub fn affinity(&self) -> i32 {
        self.agent.descriptor().affinity
    }

    /// Number of invocations currently running on this agent.
    pub fn load(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Invoke the agent, counting the call toward its load while it runs.
    pub async fn invoke(&self, inputs: &AgentInputs) -> Result<serde_json::Value, AgentError> {
        let _guard = LoadGuard::enter(&self.in_flight);
        self.agent.invoke(inputs).await
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id())
            .field("affinity", &self.affinity())
            .field("load", &self.load())
            .finish()
    }
}

/// Decrements the counter on drop, including when the invocation future is
/// cancelled mid-flight.
struct LoadGuard<'a>(&'a AtomicUsize);

impl<'a> LoadGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
