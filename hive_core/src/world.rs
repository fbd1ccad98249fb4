//! World orchestration: one isolated run of a set of agents.
//!
//! Lifecycle: `build` → `spawn_agent`* → `run` → `stop`. A world is never
//! reused; calling `run` a second time is a lifecycle error.

use crate::agent_runtime::{Agent, AgentSettings};
use crate::clock::SimulationClock;
use crate::config::WorldConfig;
use crate::metrics::{MetricDefinition, MetricExtractor, MetricReportRow, MetricsTracker};
use crate::state::{agent_key, SharedWorldState, AGENTS_KEY, WORLD_STATE_KEY};
use hive_env::{
    Event, EventKind, ReasoningService, ShutdownToken, SwarmError, WorldContext, WorldState,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle status of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldStatus {
    Initialized,
    Running,
    Stopped,
}

impl WorldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldStatus::Initialized => "initialized",
            WorldStatus::Running => "running",
            WorldStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run parameters of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Simulated seconds per real second (default: 1.0)
    pub time_scale: f64,

    /// Simulated duration after which the world stops itself
    pub duration: Option<Duration>,

    /// Wall-time cadence of metric sampling (default: 1s)
    pub metrics_interval: Duration,

    /// How long `stop` waits for tasks before aborting them (default: 5s)
    pub stop_grace: Duration,

    /// Settings applied to every spawned agent
    pub agent: AgentSettings,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            duration: None,
            metrics_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
            agent: AgentSettings::default(),
        }
    }
}

impl WorldSettings {
    pub fn validate(&self) -> Result<(), SwarmError> {
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(SwarmError::config(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        if self.metrics_interval.is_zero() {
            return Err(SwarmError::config("metrics_interval must be non-zero"));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a world and seeds its state.
pub struct WorldBuilder<Ctx: WorldContext> {
    id: String,
    context: Arc<Ctx>,
    reasoner: Arc<dyn ReasoningService>,
    state: Option<Arc<dyn WorldState>>,
    config: Option<WorldConfig>,
    settings: WorldSettings,
    metrics: Vec<MetricDefinition>,
}

impl<Ctx: WorldContext> WorldBuilder<Ctx> {
    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn settings(mut self, settings: WorldSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses an existing store instead of a fresh in-memory one.
    pub fn state(mut self, state: Arc<dyn WorldState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn metrics(mut self, definitions: Vec<MetricDefinition>) -> Self {
        self.metrics = definitions;
        self
    }

    /// Validates the inputs, seeds the state and publishes `world_created`.
    pub async fn build(self) -> Result<Arc<World<Ctx>>, SwarmError> {
        self.settings.validate()?;
        if let Some(config) = &self.config {
            config.validate()?;
        }

        let state: Arc<dyn WorldState> = match self.state {
            Some(state) => state,
            None => SharedWorldState::shared(),
        };

        if let Some(config) = &self.config {
            for (key, value) in &config.initial_state {
                if key != AGENTS_KEY {
                    state.update(key, value.clone()).await;
                }
            }
            state
                .update(AGENTS_KEY, serde_json::to_value(&config.agents)?)
                .await;
        }

        let clock = Arc::new(SimulationClock::new(
            Arc::clone(&self.context),
            self.settings.time_scale,
            self.settings.duration,
        ));

        let world = Arc::new(World {
            id: self.id,
            context: self.context,
            state,
            reasoner: self.reasoner,
            config: self.config,
            settings: self.settings,
            agents: Mutex::new(Vec::new()),
            metrics: Arc::new(Mutex::new(MetricsTracker::with_definitions(&self.metrics))),
            clock,
            status: Mutex::new(WorldStatus::Initialized),
            shutdown: ShutdownToken::new(),
            stopping: AtomicBool::new(false),
            stopped: ShutdownToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        world.write_world_state(WorldStatus::Initialized).await;
        world
            .state
            .publish_event(
                Event::new(EventKind::WorldCreated, world.id.clone())
                    .with_data("world_id", json!(world.id)),
            )
            .await;
        info!(world = %world.id, "World created");

        Ok(world)
    }
}

/// One isolated world: shared state, agents, a clock and metrics.
pub struct World<Ctx: WorldContext> {
    id: String,
    context: Arc<Ctx>,
    state: Arc<dyn WorldState>,
    reasoner: Arc<dyn ReasoningService>,
    config: Option<WorldConfig>,
    settings: WorldSettings,
    agents: Mutex<Vec<Arc<Agent<Ctx>>>>,
    metrics: Arc<Mutex<MetricsTracker>>,
    clock: Arc<SimulationClock<Ctx>>,
    status: Mutex<WorldStatus>,
    shutdown: ShutdownToken,
    /// Set by the first `stop` call
    stopping: AtomicBool,
    /// Fired once the stop sequence has finished
    stopped: ShutdownToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<Ctx: WorldContext> World<Ctx> {
    pub fn builder(
        id: impl Into<String>,
        context: Arc<Ctx>,
        reasoner: Arc<dyn ReasoningService>,
    ) -> WorldBuilder<Ctx> {
        WorldBuilder {
            id: id.into(),
            context,
            reasoner,
            state: None,
            config: None,
            settings: WorldSettings::default(),
            metrics: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorldStatus {
        *lock(&self.status)
    }

    pub fn state(&self) -> Arc<dyn WorldState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> Option<&WorldConfig> {
        self.config.as_ref()
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn agents(&self) -> Vec<Arc<Agent<Ctx>>> {
        lock(&self.agents).clone()
    }

    pub fn agent_count(&self) -> usize {
        lock(&self.agents).len()
    }

    /// Total act phases completed by all agents.
    pub fn total_actions(&self) -> u64 {
        lock(&self.agents).iter().map(|a| a.actions_taken()).sum()
    }

    pub fn simulated_elapsed(&self) -> Duration {
        self.clock.simulated_elapsed()
    }

    pub fn metrics_report(&self) -> Vec<MetricReportRow> {
        lock(&self.metrics).report()
    }

    pub fn metric_values(&self) -> BTreeMap<String, Value> {
        lock(&self.metrics).current_values()
    }

    pub fn register_metric_extractor(&self, name: impl Into<String>, extractor: MetricExtractor) {
        lock(&self.metrics).register_extractor(name, extractor);
    }

    /// Saves the metrics history as JSON.
    pub fn save_metrics<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), SwarmError> {
        lock(&self.metrics).save_to_file(path)
    }

    /// Returns each agent's last action.
    pub async fn last_actions(&self) -> BTreeMap<String, String> {
        self.state
            .get_agents()
            .await
            .into_iter()
            .filter_map(|(id, record)| record.last_action.map(|action| (id, action)))
            .collect()
    }

    /// Creates an agent, records it as ready and publishes `agent_spawned`.
    pub async fn spawn_agent(&self, agent_id: &str) -> Result<Arc<Agent<Ctx>>, SwarmError> {
        if self.status() != WorldStatus::Initialized || self.stopping.load(Ordering::SeqCst) {
            return Err(SwarmError::lifecycle(format!(
                "cannot spawn {} in {} world {}",
                agent_id,
                self.status(),
                self.id
            )));
        }
        if lock(&self.agents).iter().any(|a| a.id() == agent_id) {
            return Err(SwarmError::lifecycle(format!(
                "agent {} already exists in world {}",
                agent_id, self.id
            )));
        }

        let mut agent = Agent::new(
            agent_id,
            Arc::clone(&self.context),
            Arc::clone(&self.state),
            Arc::clone(&self.reasoner),
        )
        .with_settings(self.settings.agent.clone())
        .with_clock(Arc::clone(&self.clock));
        if let Some(config) = &self.config {
            agent = agent.with_system_prompt(config.system_prompt.clone());
            if let Some(profile) = config.agent(agent_id) {
                agent = agent.with_profile(profile.clone());
            }
        }
        let agent = Arc::new(agent);
        agent.register().await;
        lock(&self.agents).push(Arc::clone(&agent));

        self.state
            .update(
                &agent_key(agent_id),
                json!({
                    "id": agent_id,
                    "active": true,
                    "last_action": "Agent initialized",
                    "status": "ready",
                }),
            )
            .await;
        self.state
            .publish_event(
                Event::new(EventKind::AgentSpawned, self.id.clone())
                    .with_data("agent_id", json!(agent_id))
                    .with_data("world_id", json!(self.id))
                    .with_data("status", json!("spawned")),
            )
            .await;

        debug!(world = %self.id, agent = agent_id, "Agent spawned");
        Ok(agent)
    }

    /// Runs until the clock reaches the duration or `stop` is called, then
    /// stops the world.
    pub async fn run(&self) -> Result<(), SwarmError> {
        {
            let mut status = lock(&self.status);
            if *status != WorldStatus::Initialized || self.stopping.load(Ordering::SeqCst) {
                return Err(SwarmError::lifecycle(format!(
                    "world {} cannot run from status {}",
                    self.id, *status
                )));
            }
            *status = WorldStatus::Running;
        }

        self.write_world_state(WorldStatus::Running).await;
        self.state
            .publish_event(
                Event::new(EventKind::WorldStarted, self.id.clone())
                    .with_data("world_id", json!(self.id)),
            )
            .await;

        let agents = self.agents();
        info!(world = %self.id, agents = agents.len(), "Starting world");

        let mut handles = Vec::with_capacity(agents.len() + 2);
        for agent in agents {
            let name = format!("agent-{}", agent.id());
            handles.push(self.context.spawn(&name, async move { agent.run().await }));
        }

        let clock = Arc::clone(&self.clock);
        let token = self.shutdown.clone();
        handles.push(self.context.spawn("clock", async move {
            clock.run(token).await;
        }));

        handles.push(self.context.spawn("metrics", self.metrics_loop()));
        lock(&self.tasks).extend(handles);

        self.shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }

    fn metrics_loop(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let context = Arc::clone(&self.context);
        let state = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        let token = self.shutdown.clone();
        let interval = self.settings.metrics_interval;

        async move {
            loop {
                tokio::select! {
                    _ = context.sleep(interval) => {}
                    _ = token.cancelled() => break,
                }
                let agents = state.get_agents().await;
                let timestamp = clock.simulated_elapsed().as_secs_f64();
                lock(&metrics).sample(&agents, timestamp);
            }
        }
    }

    /// Stops every unit, flushes final state and publishes `world_stopped`.
    ///
    /// Idempotent: a concurrent or later call waits for the first one to
    /// finish and does nothing else. The status reads `Stopped` only once
    /// tasks are joined and the final state is written.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            self.stopped.cancelled().await;
            return;
        }
        info!(world = %self.id, "Stopping world");

        self.shutdown.cancel();
        for agent in self.agents() {
            agent.stop();
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        let deadline = tokio::time::Instant::now() + self.settings.stop_grace;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(world = %self.id, "Task did not finish within grace period, aborting");
                handle.abort();
            }
        }

        let agents = self.state.get_agents().await;
        let timestamp = self.clock.simulated_elapsed().as_secs_f64();
        lock(&self.metrics).sample(&agents, timestamp);

        self.write_world_state(WorldStatus::Stopped).await;
        *lock(&self.status) = WorldStatus::Stopped;
        self.state
            .publish_event(
                Event::new(EventKind::WorldStopped, self.id.clone())
                    .with_data("world_id", json!(self.id))
                    .with_data("actions", json!(self.total_actions())),
            )
            .await;
        self.stopped.cancel();
        info!(world = %self.id, actions = self.total_actions(), "World stopped");
    }

    async fn write_world_state(&self, status: WorldStatus) {
        self.state
            .update(
                WORLD_STATE_KEY,
                json!({
                    "world_id": self.id,
                    "status": status.as_str(),
                    "agent_count": self.agent_count(),
                    "simulated_secs": self.clock.simulated_elapsed().as_secs_f64(),
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentProfile;
    use crate::metrics::{Aggregation, MetricKind};
    use async_trait::async_trait;
    use hive_env::{AgentRecord, TokioContext};

    struct Busy;

    #[async_trait]
    impl ReasoningService for Busy {
        async fn complete(&self, _prompt: &str) -> Result<String, SwarmError> {
            Ok("working".into())
        }
    }

    fn quick_settings() -> WorldSettings {
        WorldSettings {
            time_scale: 1.0,
            duration: Some(Duration::from_secs(3)),
            agent: AgentSettings {
                action_delay: Duration::from_secs(1),
                ..AgentSettings::default()
            },
            ..WorldSettings::default()
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(WorldSettings::default().validate().is_ok());
        let bad = WorldSettings {
            time_scale: 0.0,
            ..WorldSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_seeds_state_from_config() {
        let config = WorldConfig::new("office", vec![AgentProfile::named("alice")], "be kind")
            .unwrap()
            .with_initial("weather", json!("sunny"));
        let world = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .config(config)
            .build()
            .await
            .unwrap();

        let state = world.state();
        assert_eq!(state.get("weather").await, Some(json!("sunny")));
        assert_eq!(state.get_agent_state("alice").await.status, "initialized");
        assert_eq!(
            state.get(WORLD_STATE_KEY).await.unwrap()["status"],
            json!("initialized")
        );
        assert_eq!(world.status(), WorldStatus::Initialized);
    }

    #[tokio::test]
    async fn test_invalid_settings_abort_creation() {
        let result = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .settings(WorldSettings {
                time_scale: -1.0,
                ..WorldSettings::default()
            })
            .build()
            .await;
        assert!(matches!(result, Err(SwarmError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_spawn_agent_records_ready() {
        let world = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .build()
            .await
            .unwrap();

        world.spawn_agent("alice").await.unwrap();
        let record = world.state().get_agent_state("alice").await;
        assert!(record.active);
        assert_eq!(record.status, "ready");

        assert!(world.spawn_agent("alice").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_duration() {
        let world = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .settings(quick_settings())
            .metrics(vec![MetricDefinition::new(
                "energy",
                "mean energy",
                MetricKind::Numeric,
                json!(0),
            )
            .aggregated(Aggregation::Latest)])
            .build()
            .await
            .unwrap();
        world.spawn_agent("alice").await.unwrap();
        world.spawn_agent("bob").await.unwrap();

        world.run().await.unwrap();

        assert_eq!(world.status(), WorldStatus::Stopped);
        assert!(world.total_actions() >= 2);
        assert!(world.simulated_elapsed() >= Duration::from_secs(3));
        assert!(world.agents().iter().all(|a| a.is_stopped()));
        assert_eq!(
            world.state().get(WORLD_STATE_KEY).await.unwrap()["status"],
            json!("stopped")
        );
        assert_eq!(world.last_actions().await["alice"], "working");
        assert!(world.metric_values().contains_key("energy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_extractor_feeds_saved_metrics() {
        let world = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .settings(quick_settings())
            .metrics(vec![MetricDefinition::new(
                "acting",
                "agents that have acted",
                MetricKind::Numeric,
                json!(0),
            )
            .aggregated(Aggregation::Latest)])
            .build()
            .await
            .unwrap();
        let extractor: MetricExtractor = Arc::new(|agents: &BTreeMap<String, AgentRecord>| {
            Some(json!(agents.values().filter(|r| r.status == "active").count()))
        });
        world.register_metric_extractor("acting", extractor);
        world.spawn_agent("alice").await.unwrap();
        world.spawn_agent("bob").await.unwrap();

        world.run().await.unwrap();
        assert_eq!(world.metric_values()["acting"].as_f64(), Some(2.0));

        let path = std::env::temp_dir().join(format!("hive-metrics-{}.json", uuid::Uuid::new_v4()));
        world.save_metrics(&path).unwrap();
        let loaded = MetricsTracker::load_from_file(&path);
        std::fs::remove_file(&path).ok();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.current_value("acting").and_then(|v| v.as_f64()), Some(2.0));
        assert!(loaded.history("acting").len() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_stop_ends_run() {
        let world = World::builder("w1", TokioContext::shared(), Arc::new(Busy))
            .settings(WorldSettings {
                duration: None,
                ..quick_settings()
            })
            .build()
            .await
            .unwrap();
        world.spawn_agent("alice").await.unwrap();

        let runner = tokio::spawn({
            let world = world.clone();
            async move { world.run().await }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        world.stop().await;
        world.stop().await;

        runner.await.unwrap().unwrap();
        assert_eq!(world.status(), WorldStatus::Stopped);
        assert!(world.run().await.is_err());
        assert!(world.spawn_agent("late").await.is_err());
    }
}
