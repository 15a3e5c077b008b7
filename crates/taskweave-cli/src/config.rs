use serde::Deserialize;
use std::path::Path;
use taskweave_orchestrator::OrchestratorConfig;
use tracing::warn;

/// Contents of `taskweave.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct TaskweaveConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

/// What a built-in demo agent does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Return the resolved inputs as an object.
    #[default]
    Echo,
    /// Return `value`.
    Constant,
    /// Shallow-merge every object input into one object.
    Merge,
    /// Fail with a non-retryable error, using `value` as the message.
    Fail,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affinity: i32,
    #[serde(default)]
    pub kind: AgentKind,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Simulated work per call.
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail transiently on the first N calls.
    #[serde(default)]
    pub fail_times: u32,
    /// Register the agent as unavailable.
    #[serde(default)]
    pub disabled: bool,
}

impl TaskweaveConfig {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.orchestrator.validate()?;
        for agent in &config.agents {
            if agent.capabilities.is_empty() {
                anyhow::bail!("Agent '{}' declares no capabilities", agent.id);
            }
        }
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults and no agents.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_toml_str(&source)
    }
}
