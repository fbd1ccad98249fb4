//! Error types for Hive worlds.

use thiserror::Error;

/// Errors that can occur while building or running worlds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwarmError {
    /// Malformed world or agent specification (aborts world creation)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport or service failure from the reasoning backend
    #[error("External service error: {0}")]
    ExternalService(String),

    /// I/O failure on the persistent cache tier
    #[error("Cache error: {0}")]
    Cache(String),

    /// A work item or world run exceeded its bound
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// An agent's observe/decide/act cycle failed for a non-service reason
    #[error("Agent execution error: {0}")]
    AgentExecution(String),

    /// A world was used outside its create/run/stop lifecycle
    #[error("World lifecycle error: {0}")]
    WorldLifecycle(String),

    /// Work was submitted to a worker pool that has been shut down
    #[error("Worker pool is shut down")]
    PoolClosed,
}

impl SwarmError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an external service error.
    pub fn service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    /// Creates a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Creates an agent execution error.
    pub fn agent(msg: impl Into<String>) -> Self {
        Self::AgentExecution(msg.into())
    }

    /// Creates a lifecycle error.
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::WorldLifecycle(msg.into())
    }

    /// Creates a timeout error from an elapsed bound.
    pub fn timeout(bound: std::time::Duration) -> Self {
        Self::Timeout(bound.as_millis() as u64)
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalService(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}
