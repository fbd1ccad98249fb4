//! Agent Runtime - the observe / decide / act loop of one agent.
//!
//! Each agent has two control paths sharing one private context:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Agent                             │
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
//! │  │       active loop        │  │      inbound handler    │  │
//! │  │  observe → decide → act  │  │  state_changed → observe│  │
//! │  │  → delay → repeat        │  │  agent_action  → note   │  │
//! │  └────────────┬─────────────┘  └────────────┬────────────┘  │
//! │               └──── append-only context ────┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `stop()` is cooperative: it is observed at iteration boundaries and
//! during the delay, never inside an in-flight reasoning call.
//!
//! # Usage
//!
//! ```ignore
//! use hive_core::agent_runtime::Agent;
//! use hive_env::TokioContext;
//!
//! let agent = Arc::new(Agent::new("alice", TokioContext::shared(), state, reasoner));
//! agent.register().await;
//! agent.run().await;
//! ```

use crate::clock::SimulationClock;
use crate::config::AgentProfile;
use crate::state::{agent_key, WORLD_STATE_KEY};
use async_trait::async_trait;
use hive_env::{
    AgentRecord, Event, EventHandler, EventKind, ReasoningService, ShutdownToken, SwarmError,
    WorldContext, WorldState,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Who an agent's actions are announced to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    /// Every subscriber
    #[default]
    Broadcast,
    /// Only agents named in the profile's relationships
    Related,
}

/// Tunables of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Pause between cycles (default: 5s)
    pub action_delay: Duration,

    /// Number of recent context entries included in a prompt (default: 10)
    pub context_window: usize,

    /// Audience of `agent_action` events
    pub scope: ActionScope,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            action_delay: Duration::from_secs(5),
            context_window: 10,
            scope: ActionScope::Broadcast,
        }
    }
}

/// Origin of a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    /// Note about something that happened elsewhere
    System,
    /// The agent's own action
    Assistant,
}

/// One entry of an agent's private context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: ContextRole,
    pub text: String,
}

/// What an agent sees of the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Observation {
    /// Simulated seconds since the world started running
    pub elapsed_secs: f64,
    pub world_state: Value,
    pub other_agents: BTreeMap<String, AgentRecord>,
}

async fn observe_world(state: &dyn WorldState, self_id: &str, elapsed: Duration) -> Observation {
    let world_state = state.get(WORLD_STATE_KEY).await.unwrap_or_else(|| json!({}));
    let mut other_agents = state.get_agents().await;
    other_agents.remove(self_id);
    Observation {
        elapsed_secs: elapsed.as_secs_f64(),
        world_state,
        other_agents,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads the world clock, or context time for an agent outside a world.
struct Timeline<Ctx: WorldContext> {
    context: Arc<Ctx>,
    clock: Option<Arc<SimulationClock<Ctx>>>,
}

impl<Ctx: WorldContext> Timeline<Ctx> {
    fn elapsed(&self) -> Duration {
        match &self.clock {
            Some(clock) => clock.simulated_elapsed(),
            None => self.context.now(),
        }
    }
}

impl<Ctx: WorldContext> Clone for Timeline<Ctx> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            clock: self.clock.clone(),
        }
    }
}

/// An autonomous unit acting on shared world state.
pub struct Agent<Ctx: WorldContext> {
    id: String,
    profile: Option<AgentProfile>,
    system_prompt: String,
    context: Arc<Ctx>,
    timeline: Timeline<Ctx>,
    state: Arc<dyn WorldState>,
    reasoner: Arc<dyn ReasoningService>,
    memory: Arc<Mutex<Vec<ContextEntry>>>,
    observation: Arc<Mutex<Option<Observation>>>,
    settings: AgentSettings,
    shutdown: ShutdownToken,
    actions: AtomicU64,
}

impl<Ctx: WorldContext> Agent<Ctx> {
    pub fn new(
        id: impl Into<String>,
        context: Arc<Ctx>,
        state: Arc<dyn WorldState>,
        reasoner: Arc<dyn ReasoningService>,
    ) -> Self {
        Self {
            id: id.into(),
            profile: None,
            system_prompt: String::new(),
            timeline: Timeline {
                context: Arc::clone(&context),
                clock: None,
            },
            context,
            state,
            reasoner,
            memory: Arc::new(Mutex::new(Vec::new())),
            observation: Arc::new(Mutex::new(None)),
            settings: AgentSettings::default(),
            shutdown: ShutdownToken::new(),
            actions: AtomicU64::new(0),
        }
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stamps observations and actions with the world's simulated time.
    pub fn with_clock(mut self, clock: Arc<SimulationClock<Ctx>>) -> Self {
        self.timeline.clock = Some(clock);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> Option<&AgentProfile> {
        self.profile.as_ref()
    }

    /// Number of completed act phases.
    pub fn actions_taken(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }

    /// Returns a copy of the private context.
    pub fn context_entries(&self) -> Vec<ContextEntry> {
        lock(&self.memory).clone()
    }

    /// Empties the private context. The only non-append mutation.
    pub fn reset_context(&self) {
        lock(&self.memory).clear();
    }

    /// Returns the observation cached by the inbound handler.
    pub fn cached_observation(&self) -> Option<Observation> {
        lock(&self.observation).clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Registers the inbound handler under the agent's id.
    pub async fn register(&self) {
        let inbox = AgentInbox {
            id: self.id.clone(),
            timeline: self.timeline.clone(),
            state: Arc::downgrade(&self.state),
            memory: Arc::clone(&self.memory),
            observation: Arc::clone(&self.observation),
        };
        self.state.subscribe(&self.id, Arc::new(inbox)).await;
    }

    /// Reads the world as seen by this agent.
    pub async fn observe(&self) -> Observation {
        let observation = observe_world(self.state.as_ref(), &self.id, self.timeline.elapsed()).await;
        *lock(&self.observation) = Some(observation.clone());
        observation
    }

    /// Asks the reasoning service for the next action.
    pub async fn decide(&self, observation: &Observation) -> Result<String, SwarmError> {
        let prompt = self.build_prompt(observation);
        let response = self.reasoner.complete(&prompt).await?;
        let content = response.trim();
        if content.is_empty() {
            return Err(SwarmError::agent(format!("{} received an empty decision", self.id)));
        }
        Ok(content.to_string())
    }

    /// Applies an action: context, agent record, then `agent_action`.
    pub async fn act(&self, content: &str) -> Result<(), SwarmError> {
        lock(&self.memory).push(ContextEntry {
            role: ContextRole::Assistant,
            text: content.to_string(),
        });

        let timestamp = self.timeline.elapsed().as_secs_f64();
        self.state
            .update(
                &agent_key(&self.id),
                json!({
                    "id": self.id,
                    "name": self.id,
                    "active": true,
                    "status": "active",
                    "last_action": content,
                }),
            )
            .await;

        let mut event = Event::new(EventKind::AgentAction, self.id.clone()).with_data(
            "action",
            json!({
                "type": "action",
                "content": content,
                "agent_id": self.id,
                "timestamp": timestamp,
            }),
        );
        if let Some(targets) = self.action_targets() {
            event = event.with_targets(targets);
        }
        self.state.publish_event(event).await;

        self.actions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// One full observe / decide / act cycle.
    pub async fn step(&self) -> Result<String, SwarmError> {
        let observation = self.observe().await;
        let content = self.decide(&observation).await?;
        self.act(&content).await?;
        debug!(agent = %self.id, "Cycle complete");
        Ok(content)
    }

    /// Runs cycles until `stop()` is called.
    ///
    /// A failed cycle is logged and retried after the delay.
    pub async fn run(&self) {
        info!(agent = %self.id, "Starting agent loop");

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.step().await {
                warn!(agent = %self.id, error = %e, "Agent cycle failed");
            }

            tokio::select! {
                _ = self.context.sleep(self.settings.action_delay) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }

        info!(agent = %self.id, actions = self.actions_taken(), "Agent stopped");
    }

    /// Requests the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn action_targets(&self) -> Option<BTreeSet<String>> {
        match (self.settings.scope, &self.profile) {
            (ActionScope::Related, Some(profile)) => {
                let targets: BTreeSet<String> = profile.related_agents().into_iter().collect();
                (!targets.is_empty()).then_some(targets)
            }
            _ => None,
        }
    }

    fn build_prompt(&self, observation: &Observation) -> String {
        let mut prompt = String::new();
        if !self.system_prompt.is_empty() {
            prompt.push_str(&self.system_prompt);
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!("You are {}.\n", self.id));
        if let Some(profile) = &self.profile {
            prompt.push_str(&format!("Role: {}\n", profile.description));
            if !profile.properties.is_empty() {
                prompt.push_str(&format!("Properties: {}\n", Value::Object(profile.properties.clone())));
            }
            for relationship in &profile.relationships {
                prompt.push_str(&format!("Relationship: {} ({})\n", relationship.to, relationship.kind));
            }
        }

        prompt.push_str(&format!(
            "\nSimulated time: {:.1}s\nWorld state: {}\n",
            observation.elapsed_secs, observation.world_state
        ));
        if !observation.other_agents.is_empty() {
            prompt.push_str("Other agents:\n");
            for (id, record) in &observation.other_agents {
                let last = record.last_action.as_deref().unwrap_or("nothing yet");
                prompt.push_str(&format!("- {} [{}]: {}\n", id, record.status, last));
            }
        }

        let memory = lock(&self.memory);
        let recent = &memory[memory.len().saturating_sub(self.settings.context_window)..];
        if !recent.is_empty() {
            prompt.push_str("\nRecent context:\n");
            for entry in recent {
                let tag = match entry.role {
                    ContextRole::System => "note",
                    ContextRole::Assistant => "you",
                };
                prompt.push_str(&format!("[{}] {}\n", tag, entry.text));
            }
        }

        prompt.push_str("\nDescribe what you do next, staying in character.");
        prompt
    }
}

/// Inbound event handler registered for an agent.
struct AgentInbox<Ctx: WorldContext> {
    id: String,
    timeline: Timeline<Ctx>,
    state: Weak<dyn WorldState>,
    memory: Arc<Mutex<Vec<ContextEntry>>>,
    observation: Arc<Mutex<Option<Observation>>>,
}

#[async_trait]
impl<Ctx: WorldContext> EventHandler for AgentInbox<Ctx> {
    async fn handle(&self, event: &Event) {
        match &event.kind {
            EventKind::StateChanged => {
                let Some(state) = self.state.upgrade() else {
                    return;
                };
                let observation = observe_world(state.as_ref(), &self.id, self.timeline.elapsed()).await;
                *lock(&self.observation) = Some(observation);
            }
            EventKind::AgentAction if event.source != self.id => {
                let content = event
                    .data
                    .get("action")
                    .and_then(|action| action.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or("(no details)");
                lock(&self.memory).push(ContextEntry {
                    role: ContextRole::System,
                    text: format!("{} acted: {}", event.source, content),
                });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedWorldState;
    use hive_env::TokioContext;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Echo {
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for Echo {
        async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(format!("action {}", n))
        }
    }

    struct Failing;

    #[async_trait]
    impl ReasoningService for Failing {
        async fn complete(&self, _prompt: &str) -> Result<String, SwarmError> {
            Err(SwarmError::service("backend down"))
        }
    }

    fn agent(
        id: &str,
        state: &Arc<SharedWorldState>,
        reasoner: Arc<dyn ReasoningService>,
    ) -> Agent<TokioContext> {
        let state: Arc<dyn WorldState> = state.clone();
        Agent::new(id, TokioContext::shared(), state, reasoner)
    }

    #[tokio::test]
    async fn test_step_updates_record_and_context() {
        let state = SharedWorldState::shared();
        let alice = agent("alice", &state, Echo::new());

        let content = alice.step().await.unwrap();

        assert_eq!(content, "action 1");
        assert_eq!(alice.actions_taken(), 1);
        let record = state.get_agent_state("alice").await;
        assert!(record.active);
        assert_eq!(record.last_action.as_deref(), Some("action 1"));
        assert_eq!(alice.context_entries()[0].role, ContextRole::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_carries_simulated_time() {
        let state = SharedWorldState::shared();
        let context = TokioContext::shared();
        let clock = Arc::new(SimulationClock::new(
            Arc::clone(&context),
            10.0,
            Some(Duration::from_secs(60)),
        ));
        assert!(clock.run(ShutdownToken::new()).await);

        let echo = Echo::new();
        let state_dyn: Arc<dyn WorldState> = state.clone();
        let alice = Agent::new("alice", context, state_dyn, echo.clone()).with_clock(clock);

        let observation = alice.observe().await;
        assert!(observation.elapsed_secs >= 60.0);

        alice.step().await.unwrap();
        let prompt = echo.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Simulated time: 60.0s"), "{}", prompt);
    }

    #[tokio::test]
    async fn test_observe_excludes_self() {
        let state = SharedWorldState::shared();
        state.update(&agent_key("alice"), json!({"active": true})).await;
        state.update(&agent_key("bob"), json!({"active": true})).await;
        state.update(WORLD_STATE_KEY, json!({"status": "running"})).await;

        let alice = agent("alice", &state, Echo::new());
        let observation = alice.observe().await;

        assert_eq!(observation.world_state["status"], json!("running"));
        assert!(observation.other_agents.contains_key("bob"));
        assert!(!observation.other_agents.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_inbox_notes_other_agents_actions() {
        let state = SharedWorldState::shared();
        let alice = agent("alice", &state, Echo::new());
        let bob = agent("bob", &state, Echo::new());
        alice.register().await;
        bob.register().await;

        bob.step().await.unwrap();

        let notes = alice.context_entries();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].role, ContextRole::System);
        assert_eq!(notes[0].text, "bob acted: action 1");
        // own action is not noted twice
        assert_eq!(bob.context_entries().len(), 1);
        // state_changed refreshed the cached observation
        assert!(alice
            .cached_observation()
            .unwrap()
            .other_agents
            .contains_key("bob"));
    }

    #[tokio::test]
    async fn test_context_window_limits_prompt() {
        let state = SharedWorldState::shared();
        let echo = Echo::new();
        let alice = agent("alice", &state, echo.clone()).with_settings(AgentSettings {
            context_window: 1,
            ..AgentSettings::default()
        });

        alice.step().await.unwrap();
        alice.step().await.unwrap();
        alice.step().await.unwrap();

        let prompts = echo.prompts.lock().unwrap();
        assert!(prompts[2].contains("[you] action 2"));
        assert!(!prompts[2].contains("[you] action 1"));

        drop(prompts);
        alice.reset_context();
        assert!(alice.context_entries().is_empty());
    }

    #[tokio::test]
    async fn test_related_scope_targets_relationships() {
        let state = SharedWorldState::shared();
        let profile = AgentProfile::named("alice").with_relationship("carol", "mentor");
        let alice = agent("alice", &state, Echo::new())
            .with_profile(profile)
            .with_settings(AgentSettings {
                scope: ActionScope::Related,
                ..AgentSettings::default()
            });
        let bob = agent("bob", &state, Echo::new());
        let carol = agent("carol", &state, Echo::new());
        bob.register().await;
        carol.register().await;

        alice.step().await.unwrap();

        assert!(bob.context_entries().is_empty());
        assert_eq!(carol.context_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_decide_failure_leaves_state_untouched() {
        let state = SharedWorldState::shared();
        let alice = agent("alice", &state, Arc::new(Failing));

        let err = alice.step().await.unwrap_err();

        assert!(matches!(err, SwarmError::ExternalService(_)));
        assert_eq!(alice.actions_taken(), 0);
        assert!(state.get_agent_state("alice").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failing_cycles() {
        let state = SharedWorldState::shared();
        let alice = Arc::new(agent("alice", &state, Arc::new(Failing)));

        let handle = tokio::spawn({
            let alice = alice.clone();
            async move { alice.run().await }
        });
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!handle.is_finished());

        alice.stop();
        handle.await.unwrap();
        assert!(alice.is_stopped());
    }

    struct Gated {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningService for Gated {
        async fn complete(&self, _prompt: &str) -> Result<String, SwarmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok("finishing the report".into())
        }
    }

    #[tokio::test]
    async fn test_stop_mid_cycle_finishes_current_cycle() {
        let state = SharedWorldState::shared();
        let gated = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let alice = Arc::new(agent("alice", &state, gated.clone()));

        let handle = tokio::spawn({
            let alice = alice.clone();
            async move { alice.run().await }
        });

        gated.entered.notified().await;
        alice.stop();
        gated.release.notify_one();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after the cycle")
            .unwrap();

        assert_eq!(alice.actions_taken(), 1);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            state.get_agent_state("alice").await.last_action.as_deref(),
            Some("finishing the report")
        );
    }
}
