//! Registry of worlds sharing one context and reasoning backend.

use crate::config::WorldConfig;
use crate::metrics::MetricDefinition;
use crate::world::{World, WorldSettings};
use hive_env::{ReasoningService, SwarmError, WorldContext};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Default number of agents spawned when a world has no configuration.
pub const DEFAULT_AGENT_COUNT: usize = 3;

/// Creates, runs and stops named worlds.
pub struct SimulationController<Ctx: WorldContext> {
    context: Arc<Ctx>,
    reasoner: Arc<dyn ReasoningService>,
    settings: WorldSettings,
    metrics: Vec<MetricDefinition>,
    worlds: Mutex<BTreeMap<String, Arc<World<Ctx>>>>,
}

impl<Ctx: WorldContext> SimulationController<Ctx> {
    pub fn new(context: Arc<Ctx>, reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            context,
            reasoner,
            settings: WorldSettings::default(),
            metrics: Vec::new(),
            worlds: Mutex::new(BTreeMap::new()),
        }
    }

    /// Settings applied to worlds created from now on.
    pub fn with_settings(mut self, settings: WorldSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Metric definitions applied to worlds created from now on.
    pub fn with_metrics(mut self, metrics: Vec<MetricDefinition>) -> Self {
        self.metrics = metrics;
        self
    }

    fn worlds(&self) -> MutexGuard<'_, BTreeMap<String, Arc<World<Ctx>>>> {
        self.worlds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a world and spawns its agents.
    ///
    /// With a configuration, one agent per profile is spawned; without one,
    /// `agent_count` agents named `<world_id>_agent_<i>`.
    pub async fn create_world(
        &self,
        world_id: &str,
        agent_count: usize,
        config: Option<WorldConfig>,
    ) -> Result<Arc<World<Ctx>>, SwarmError> {
        if self.worlds().contains_key(world_id) {
            return Err(SwarmError::lifecycle(format!("world {} already exists", world_id)));
        }

        let mut builder = World::builder(world_id, Arc::clone(&self.context), Arc::clone(&self.reasoner))
            .settings(self.settings.clone())
            .metrics(self.metrics.clone());
        let names: Vec<String> = match &config {
            Some(config) => config.agents.iter().map(|a| a.name.clone()).collect(),
            None => (0..agent_count).map(|i| format!("{}_agent_{}", world_id, i)).collect(),
        };
        if let Some(config) = config {
            builder = builder.config(config);
        }

        let world = builder.build().await?;
        for name in &names {
            world.spawn_agent(name).await?;
        }

        let mut worlds = self.worlds();
        if worlds.contains_key(world_id) {
            return Err(SwarmError::lifecycle(format!("world {} already exists", world_id)));
        }
        worlds.insert(world_id.to_string(), Arc::clone(&world));
        info!(world = world_id, agents = names.len(), "World registered");
        Ok(world)
    }

    pub fn get_world(&self, world_id: &str) -> Option<Arc<World<Ctx>>> {
        self.worlds().get(world_id).cloned()
    }

    pub fn world_ids(&self) -> Vec<String> {
        self.worlds().keys().cloned().collect()
    }

    fn require(&self, world_id: &str) -> Result<Arc<World<Ctx>>, SwarmError> {
        self.get_world(world_id)
            .ok_or_else(|| SwarmError::lifecycle(format!("world {} does not exist", world_id)))
    }

    /// Runs one world to completion.
    pub async fn start_world(&self, world_id: &str) -> Result<(), SwarmError> {
        self.require(world_id)?.run().await
    }

    pub async fn stop_world(&self, world_id: &str) -> Result<(), SwarmError> {
        self.require(world_id)?.stop().await;
        Ok(())
    }

    /// Runs every registered world concurrently and waits for all of them.
    pub async fn run_all(&self) {
        let worlds: Vec<_> = self.worlds().values().cloned().collect();
        let handles: Vec<_> = worlds
            .into_iter()
            .map(|world| {
                let name = format!("world-{}", world.id());
                self.context.spawn(&name, async move {
                    if let Err(e) = world.run().await {
                        warn!(world = %world.id(), error = %e, "World run failed");
                    }
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "World task panicked");
            }
        }
    }

    pub async fn stop_all(&self) {
        let worlds: Vec<_> = self.worlds().values().cloned().collect();
        for world in worlds {
            world.stop().await;
        }
    }

    /// Drops a world from the registry.
    pub fn remove_world(&self, world_id: &str) -> Option<Arc<World<Ctx>>> {
        self.worlds().remove(world_id)
    }
}
