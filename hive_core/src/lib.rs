//! Hive Core - engines for concurrent multi-agent worlds
//!
//! Everything here is written against the `hive_env` contracts:
//! 1. **State**: in-memory key/value store with an ordered event bus (`SharedWorldState`)
//! 2. **Agents**: the observe / decide / act loop with an inbound event handler
//! 3. **Worlds**: lifecycle, simulation clock and metric sampling
//! 4. **Reasoning**: HTTP backend, bounded retry and a content-addressed response cache

pub mod agent_runtime;
pub mod cache;
pub mod clock;
pub mod config;
pub mod controller;
pub mod llm;
pub mod metrics;
pub mod state;
pub mod world;

// Re-export key types for convenience
pub use agent_runtime::{ActionScope, Agent, AgentSettings, ContextEntry, ContextRole, Observation};
pub use cache::{CacheConfig, CacheStore, ResponseCache, SledCacheStore};
pub use clock::SimulationClock;
pub use config::{AgentProfile, Relationship, WorldConfig};
pub use controller::SimulationController;
pub use llm::{layered, CachedReasoner, HttpReasoner, ReasonerConfig, RetryPolicy, RetryingReasoner};
pub use metrics::{
    Aggregation, MetricDefinition, MetricKind, MetricReportRow, MetricsTracker, TargetDirection, Trend,
};
pub use state::SharedWorldState;
pub use world::{World, WorldSettings, WorldStatus};
