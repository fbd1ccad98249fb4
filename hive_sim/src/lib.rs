//! Hive Simulation Harness
//!
//! Runs many independent worlds in parallel. Each world is described by a
//! serializable `WorkItem`, run in isolation on a worker thread with its own
//! runtime, and reported back as a serializable `WorldReport`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ParallelRunner                        │
//! │  ┌──────────────┐  ┌──────────────┐       ┌──────────────┐  │
//! │  │   worker 0   │  │   worker 1   │  ...  │  worker W-1  │  │
//! │  │  chunk 0     │  │  chunk 1     │       │  chunk W-1   │  │
//! │  │  ┌────────┐  │  │  ┌────────┐  │       │  ┌────────┐  │  │
//! │  │  │ World  │  │  │  │ World  │  │       │  │ World  │  │  │
//! │  │  └────────┘  │  │  └────────┘  │       │  └────────┘  │  │
//! │  └──────▲───────┘  └──────▲───────┘       └──────▲───────┘  │
//! │         └─── WorkItem JSON in / WorldReport JSON out ───┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use hive_env::{ReasoningService, SwarmError};
//! use hive_sim::{ParallelRunner, ReasonerFactory, RunnerConfig, ScriptedReasoner, WorkItem};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), SwarmError> {
//! let factory: ReasonerFactory = Arc::new(|item: &WorkItem| {
//!     Ok(Arc::new(ScriptedReasoner::new(item.seed)) as Arc<dyn ReasoningService>)
//! });
//!
//! let runner = ParallelRunner::new(RunnerConfig::default())?;
//! let items = (0..4)
//!     .map(|i| WorkItem::new(format!("world_{}", i)).with_time_scale(10.0).with_seed(i))
//!     .collect();
//! let reports = runner.run_worlds(items, factory)?;
//! runner.shutdown();
//!
//! assert_eq!(reports.len(), 4);
//! # Ok(())
//! # }
//! ```

pub mod exporter;
pub mod runner;
pub mod scenarios;
pub mod scripted;
pub mod work;

pub use exporter::RunExport;
pub use runner::{chunk_size, partition, ParallelRunner, RunnerConfig, WorkerPool, DEFAULT_ITEM_TIMEOUT};
pub use scenarios::ScenarioId;
pub use scripted::ScriptedReasoner;
pub use work::{run_world, ReasonerFactory, WorkItem, WorldReport, DEFAULT_WORLD_DURATION};
