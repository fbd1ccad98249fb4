//! The serializable boundary of the parallel runner.
//!
//! A `WorkItem` carries everything needed to build and run one isolated
//! world; a `WorldReport` is everything that comes back. Both cross the
//! worker boundary as JSON bytes.

use hive_core::config::WorldConfig;
use hive_core::controller::{SimulationController, DEFAULT_AGENT_COUNT};
use hive_core::metrics::MetricDefinition;
use hive_core::world::{WorldSettings, WorldStatus};
use hive_env::{ReasoningService, SwarmError, TokioContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Simulated duration given to items built with `WorkItem::new`.
pub const DEFAULT_WORLD_DURATION: Duration = Duration::from_secs(30);

/// One independent world run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub world_id: String,

    /// Agent profiles and initial state; `None` spawns default agents
    #[serde(default)]
    pub config: Option<WorldConfig>,

    /// Number of default agents when there is no config
    #[serde(default = "default_agent_count")]
    pub agent_count: usize,

    #[serde(default = "default_settings")]
    pub settings: WorldSettings,

    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,

    /// Seed for offline reasoning
    #[serde(default)]
    pub seed: u64,
}

fn default_agent_count() -> usize {
    DEFAULT_AGENT_COUNT
}

fn default_settings() -> WorldSettings {
    WorldSettings {
        duration: Some(DEFAULT_WORLD_DURATION),
        ..WorldSettings::default()
    }
}

impl WorkItem {
    pub fn new(world_id: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            config: None,
            agent_count: DEFAULT_AGENT_COUNT,
            settings: default_settings(),
            metrics: Vec::new(),
            seed: 0,
        }
    }

    pub fn with_config(mut self, config: WorldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_settings(mut self, settings: WorldSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the simulated duration; `None` runs until the item times out.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.settings.duration = duration;
        self
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.settings.time_scale = time_scale;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricDefinition>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SwarmError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SwarmError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Outcome of one completed world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldReport {
    pub world_id: String,
    pub status: WorldStatus,
    pub agent_count: usize,
    pub actions: u64,
    pub simulated_secs: f64,
    pub wall_secs: f64,
    pub seed: u64,
    pub metrics: BTreeMap<String, Value>,
    pub last_actions: BTreeMap<String, String>,
}

impl WorldReport {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SwarmError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SwarmError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Builds the reasoning service for one work item inside its worker.
pub type ReasonerFactory =
    Arc<dyn Fn(&WorkItem) -> Result<Arc<dyn ReasoningService>, SwarmError> + Send + Sync>;

/// Creates, runs and reports one world on the current runtime.
pub async fn run_world(
    item: WorkItem,
    reasoner: Arc<dyn ReasoningService>,
) -> Result<WorldReport, SwarmError> {
    let started = Instant::now();
    debug!(world = %item.world_id, "Building world");

    let controller = SimulationController::new(TokioContext::shared(), reasoner)
        .with_settings(item.settings.clone())
        .with_metrics(item.metrics.clone());
    let world = controller
        .create_world(&item.world_id, item.agent_count, item.config.clone())
        .await?;

    controller.start_world(&item.world_id).await?;

    let report = WorldReport {
        world_id: item.world_id.clone(),
        status: world.status(),
        agent_count: world.agent_count(),
        actions: world.total_actions(),
        simulated_secs: world.simulated_elapsed().as_secs_f64(),
        wall_secs: started.elapsed().as_secs_f64(),
        seed: item.seed,
        metrics: world.metric_values(),
        last_actions: world.last_actions().await,
    };
    info!(
        world = %report.world_id,
        actions = report.actions,
        wall_secs = report.wall_secs,
        "World finished"
    );
    Ok(report)
}

/// Worker-side entry point: JSON item in, JSON report out.
pub async fn run_encoded(bytes: Vec<u8>, factory: ReasonerFactory) -> Result<Vec<u8>, SwarmError> {
    let item = WorkItem::from_bytes(&bytes)?;
    let reasoner = factory(&item)?;
    run_world(item, reasoner).await?.to_bytes()
}
