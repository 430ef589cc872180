use serde::{Deserialize, Serialize};

use crate::error::RunError;

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_wait_for_body() -> bool {
    true
}

/// Immutable parameters of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Total virtual users to ramp up to
    pub users: u64,
    /// Users added to the ramp per tick
    pub spawn_rate: u64,
    /// Wall-clock length of the run
    pub duration_secs: u64,
    /// Number of workers sharing the load
    pub workers: usize,
    /// Max concurrent connections per target; `None` is unbounded
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Time requests until the full body arrived instead of the headers
    #[serde(default = "default_wait_for_body")]
    pub wait_for_body: bool,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Base URL prepended to every request path
    pub host: String,
}

impl RunConfig {
    pub fn new(users: u64, spawn_rate: u64, duration_secs: u64, host: impl Into<String>) -> Self {
        Self {
            users,
            spawn_rate,
            duration_secs,
            workers: Self::default_workers(),
            max_connections: None,
            wait_for_body: default_wait_for_body(),
            request_timeout_ms: default_timeout_ms(),
            host: host.into(),
        }
    }

    /// Logical core count, falling back to a single worker.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.spawn_rate == 0 {
            return Err(RunError::InvalidConfig(
                "spawn rate must be at least 1".to_string(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(RunError::InvalidConfig(
                "duration must be at least 1 second".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(RunError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.max_connections == Some(0) {
            return Err(RunError::InvalidConfig(
                "connection limit must be at least 1".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(RunError::InvalidConfig("host must not be empty".to_string()));
        }
        Ok(())
    }
}
