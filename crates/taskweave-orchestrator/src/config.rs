use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskweave_core::{TaskweaveError, TaskweaveResult};

/// Backoff between retries of one subtask dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn immediate() -> Self {
        Self {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Delay before the retry that follows the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Settings for decomposition, scheduling and history retention.
///
/// Timeouts, missing agents and retryable agent errors all draw from the
/// same `max_attempts` budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Dispatch attempts per subtask, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Timeout for a single agent invocation.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Cap on concurrent dispatches within one generation. Unbounded if unset.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Cached decompositions. Zero disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Execution summaries kept by the monitor.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_dispatch_timeout_ms() -> u64 {
    30_000
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    5_000
}
fn default_cache_capacity() -> usize {
    64
}
fn default_history_limit() -> usize {
    100
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            retry: RetryPolicy::default(),
            max_parallel: None,
            cache_capacity: default_cache_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse from a TOML document holding these keys at the top level.
    pub fn from_toml_str(source: &str) -> TaskweaveResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| TaskweaveError::Config(format!("Invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TaskweaveResult<()> {
        if self.max_attempts == 0 {
            return Err(TaskweaveError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(TaskweaveError::Config(
                "dispatch_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_parallel == Some(0) {
            return Err(TaskweaveError::Config(
                "max_parallel must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}
