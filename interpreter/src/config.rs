use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on nested procedure calls.
pub const MAX_CALL_DEPTH: usize = 256;

/// Tunables of the execution engine. Every field has a default, so a
/// config file only needs to name the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_call_depth: usize,
    /// How long a stop waits for the worker before abandoning it.
    pub stop_grace_ms: u64,
    pub worker_stack_size: usize,
    /// How often a host polls `try_join`.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: MAX_CALL_DEPTH,
            stop_grace_ms: 1000,
            worker_stack_size: 16 * 1024 * 1024,
            poll_interval_ms: 16,
        }
    }
}

impl EngineConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
