use crate::agent::{Agent, AgentDescriptor, AgentError, AgentHandle, AgentInputs};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskweave_core::{TaskweaveError, TaskweaveResult};
use tracing::{info, warn};

/// Lookup interface the scheduler consumes.
///
/// The scheduler only reads from a registry. Implementations must tolerate
/// many concurrent lookups from simultaneously running subtasks.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// All currently available agents serving `capability`. May be empty.
    async fn find_agents(&self, capability: &str) -> TaskweaveResult<Vec<AgentHandle>>;

    /// Invoke `agent` with already-resolved inputs.
    async fn invoke(
        &self,
        agent: &AgentHandle,
        inputs: &AgentInputs,
    ) -> Result<serde_json::Value, AgentError> {
        agent.invoke(inputs).await
    }
}

struct Entry {
    handle: AgentHandle,
    available: bool,
}

/// In-memory registry keyed by agent id.
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Entry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register an agent. Rejects a second agent with an id already in use.
    pub fn register(&self, agent: Arc<dyn Agent>) -> TaskweaveResult<AgentHandle> {
        let handle = AgentHandle::new(agent);
        let id = handle.id().to_string();
        let mut agents = self.agents.write();
        if agents.contains_key(&id) {
            return Err(TaskweaveError::Registry(format!(
                "Agent '{id}' is already registered"
            )));
        }
        info!(
            agent = %id,
            capabilities = ?handle.descriptor().capabilities,
            "Registered agent"
        );
        agents.insert(
            id,
            Entry {
                handle: handle.clone(),
                available: true,
            },
        );
        Ok(handle)
    }

    /// Remove an agent. Returns `false` if it was not registered.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.agents.write().remove(id).is_some();
        if removed {
            info!(agent = %id, "Deregistered agent");
        }
        removed
    }

    /// Toggle liveness. Unavailable agents are hidden from lookups.
    pub fn set_available(&self, id: &str, available: bool) -> bool {
        match self.agents.write().get_mut(id) {
            Some(entry) => {
                if entry.available != available {
                    warn!(agent = %id, available, "Agent availability changed");
                }
                entry.available = available;
                true
            }
            None => false,
        }
    }

    /// Whether the agent is registered and available.
    pub fn is_available(&self, id: &str) -> bool {
        self.agents
            .read()
            .get(id)
            .map(|e| e.available)
            .unwrap_or(false)
    }

    /// Descriptors of every registered agent, ordered by id.
    pub fn list_descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .read()
            .values()
            .map(|e| e.handle.descriptor().clone())
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityRegistry for AgentRegistry {
    async fn find_agents(&self, capability: &str) -> TaskweaveResult<Vec<AgentHandle>> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|e| e.available && e.handle.descriptor().serves(capability))
            .map(|e| e.handle.clone())
            .collect())
    }
}

/// Pick one agent deterministically: highest affinity, then lowest current
/// load, then smallest id.
pub fn select_agent(candidates: &[AgentHandle]) -> Option<&AgentHandle> {
    candidates.iter().min_by(|a, b| {
        b.affinity()
            .cmp(&a.affinity())
            .then_with(|| a.load().cmp(&b.load()))
            .then_with(|| a.id().cmp(b.id()))
    })
}
