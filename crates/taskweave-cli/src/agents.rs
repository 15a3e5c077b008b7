use crate::config::{AgentKind, AgentSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::TaskweaveResult;
use taskweave_registry::{Agent, AgentDescriptor, AgentError, AgentInputs, AgentRegistry};
use tracing::info;

/// Agent declared in `taskweave.toml`, for trying out task graphs locally.
pub struct DemoAgent {
    descriptor: AgentDescriptor,
    kind: AgentKind,
    value: Value,
    delay: Duration,
    fail_times: u32,
    calls: AtomicU32,
}

impl DemoAgent {
    pub fn new(spec: &AgentSpec) -> Self {
        Self {
            descriptor: AgentDescriptor::new(spec.id.clone(), spec.capabilities.clone())
                .with_affinity(spec.affinity)
                .with_description(spec.description.clone()),
            kind: spec.kind,
            value: spec.value.clone().unwrap_or(Value::Null),
            delay: Duration::from_millis(spec.delay_ms),
            fail_times: spec.fail_times,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Agent for DemoAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, inputs: &AgentInputs) -> Result<Value, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call <= self.fail_times {
            return Err(AgentError::transient(format!(
                "{} failed call {call} of {}",
                self.descriptor.id, self.fail_times
            )));
        }

        match self.kind {
            AgentKind::Echo => Ok(Value::Object(inputs.clone())),
            AgentKind::Constant => Ok(self.value.clone()),
            AgentKind::Merge => Ok(Value::Object(merge(inputs))),
            AgentKind::Fail => Err(AgentError::fatal(match &self.value {
                Value::String(message) => message.clone(),
                _ => format!("{} is configured to fail", self.descriptor.id),
            })),
        }
    }
}

/// Object inputs are flattened into the output; other inputs keep their name.
fn merge(inputs: &AgentInputs) -> Map<String, Value> {
    let mut merged = Map::new();
    for (name, value) in inputs {
        match value {
            Value::Object(fields) => {
                for (key, field) in fields {
                    merged.insert(key.clone(), field.clone());
                }
            }
            other => {
                merged.insert(name.clone(), other.clone());
            }
        }
    }
    merged
}

/// Register every configured agent.
pub fn register_demo_agents(registry: &AgentRegistry, specs: &[AgentSpec]) -> TaskweaveResult<()> {
    for spec in specs {
        registry.register(Arc::new(DemoAgent::new(spec)))?;
        if spec.disabled {
            registry.set_available(&spec.id, false);
        }
    }
    info!(count = registry.agent_count(), "Demo agents registered");
    Ok(())
}
