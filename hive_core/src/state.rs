//! The "STATE" Engine - in-memory shared world state and event bus.
//!
//! One `SharedWorldState` per world. It is the only channel between agents:
//! they read and write keys, and they hear about each other through the
//! event bus.
//!
//! - Writes are linearized in arrival order, last write wins.
//! - `"agents"` and `"agent_<id>"` writes also merge into the agent directory.
//! - Every write broadcasts `state_changed`.
//! - Delivery awaits handlers one at a time, in subscription order for
//!   broadcasts and in target-set order for targeted events.
//!
//! No lock is held across an `.await`: handlers are collected under the lock,
//! then awaited with the lock released, so a handler may freely read or write
//! the store it is being called from.

use async_trait::async_trait;
use hive_env::{AgentRecord, Event, EventHandler, EventKind, WorldState, STATE_MANAGER_SOURCE};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Key holding the world-level status object.
pub const WORLD_STATE_KEY: &str = "world_state";

/// Key holding the configured agent list.
pub const AGENTS_KEY: &str = "agents";

/// Prefix of per-agent record keys (`agent_<id>`).
pub const AGENT_KEY_PREFIX: &str = "agent_";

/// Returns the state key of an agent's record.
pub fn agent_key(agent_id: &str) -> String {
    format!("{}{}", AGENT_KEY_PREFIX, agent_id)
}

/// Extracts the agent id from an `agent_<id>` key.
fn agent_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(AGENT_KEY_PREFIX).filter(|id| !id.is_empty())
}

#[derive(Default)]
struct StateInner {
    /// Flat key/value map
    values: HashMap<String, Value>,

    /// Derived agent directory
    agents: BTreeMap<String, AgentRecord>,

    /// Subscribers in registration order
    subscribers: Vec<(String, Arc<dyn EventHandler>)>,

    /// Bumped on every write that touches the agent directory
    revision: u64,
}

/// Reference in-memory implementation of `WorldState`.
#[derive(Default)]
pub struct SharedWorldState {
    inner: Mutex<StateInner>,
}

impl SharedWorldState {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped store for sharing across agents.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Returns a copy of the flat key/value map.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock()
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn merge_agent_list(inner: &mut StateInner, list: &[Value]) {
        let revision = inner.revision;
        for entry in list {
            let id = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let record = inner.agents.entry(id.clone()).or_insert_with(|| AgentRecord {
                id: id.clone(),
                active: true,
                status: "initialized".to_string(),
                ..Default::default()
            });
            record.merge(entry);
            record.revision = revision;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl WorldState for SharedWorldState {
    async fn update(&self, key: &str, value: Value) {
        debug!(key, "Updating state");

        {
            let mut inner = self.lock();
            inner.values.insert(key.to_string(), value.clone());

            if key == AGENTS_KEY {
                if let Some(list) = value.as_array() {
                    inner.revision += 1;
                    Self::merge_agent_list(&mut inner, list);
                }
            } else if let Some(agent_id) = agent_id_from_key(key) {
                inner.revision += 1;
                let revision = inner.revision;
                let record = inner
                    .agents
                    .entry(agent_id.to_string())
                    .or_insert_with(|| AgentRecord::new(agent_id));
                record.merge(&value);
                record.revision = revision;
            }
        }

        let event = Event::new(EventKind::StateChanged, STATE_MANAGER_SOURCE)
            .with_data("key", json!(key))
            .with_data("value", value)
            .with_data("timestamp", json!(now_millis()));
        self.publish_event(event).await;
    }

    async fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    async fn publish_event(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let inner = self.lock();
            match &event.targets {
                Some(targets) if !targets.is_empty() => targets
                    .iter()
                    .filter_map(|target| {
                        inner
                            .subscribers
                            .iter()
                            .find(|(id, _)| id == target)
                            .map(|(_, handler)| Arc::clone(handler))
                    })
                    .collect(),
                _ => inner
                    .subscribers
                    .iter()
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect(),
            }
        };

        trace!(kind = %event.kind, source = %event.source, receivers = handlers.len(), "Delivering event");

        for handler in handlers {
            handler.handle(&event).await;
        }
    }

    async fn subscribe(&self, id: &str, handler: Arc<dyn EventHandler>) {
        debug!(subscriber = id, "New subscriber");
        let mut inner = self.lock();
        match inner.subscribers.iter_mut().find(|(existing, _)| existing == id) {
            Some(slot) => slot.1 = handler,
            None => inner.subscribers.push((id.to_string(), handler)),
        }
    }

    async fn unsubscribe(&self, id: &str) {
        self.lock().subscribers.retain(|(existing, _)| existing != id);
    }

    async fn get_agents(&self) -> BTreeMap<String, AgentRecord> {
        self.lock().agents.clone()
    }

    async fn get_agent_state(&self, id: &str) -> AgentRecord {
        self.lock().agents.get(id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every delivered event under a label.
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<(&'static str, Event)>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) {
            self.log.lock().unwrap().push((self.label, event.clone()));
        }
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<(&'static str, Event)>>>,
    ) -> Arc<dyn EventHandler> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
        })
    }

    fn labels(log: &Arc<Mutex<Vec<(&'static str, Event)>>>) -> Vec<&'static str> {
        log.lock().unwrap().iter().map(|(l, _)| *l).collect()
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let state = SharedWorldState::new();
        state.update("weather", json!("rain")).await;
        state.update("weather", json!("sun")).await;

        assert_eq!(state.get("weather").await, Some(json!("sun")));
        assert_eq!(state.get("never_written").await, None);
    }

    #[tokio::test]
    async fn test_update_broadcasts_state_changed() {
        let state = SharedWorldState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        state.subscribe("monitor", recorder("monitor", &log)).await;

        state.update("weather", json!("rain")).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let event = &log[0].1;
        assert_eq!(event.kind, EventKind::StateChanged);
        assert_eq!(event.source, STATE_MANAGER_SOURCE);
        assert_eq!(event.data["key"], json!("weather"));
        assert_eq!(event.data["value"], json!("rain"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_in_registration_order() {
        let state = SharedWorldState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        state.subscribe("c", recorder("c", &log)).await;
        state.subscribe("a", recorder("a", &log)).await;
        state.subscribe("b", recorder("b", &log)).await;

        state.publish_event(Event::new(EventKind::Custom("ping".into()), "test")).await;

        assert_eq!(labels(&log), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_is_not_invoked() {
        let state = SharedWorldState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        state.subscribe("a", recorder("a", &log)).await;
        state.subscribe("b", recorder("b", &log)).await;
        state.unsubscribe("a").await;
        state.unsubscribe("not-there").await;

        state.publish_event(Event::new(EventKind::Custom("ping".into()), "test")).await;

        assert_eq!(labels(&log), vec!["b"]);
        assert_eq!(state.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_targeted_delivery_only_reaches_targets() {
        let state = SharedWorldState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        state.subscribe("a", recorder("a", &log)).await;
        state.subscribe("b", recorder("b", &log)).await;
        state.subscribe("c", recorder("c", &log)).await;

        let event = Event::new(EventKind::AgentAction, "a").with_targets(["c", "b", "ghost"]);
        state.publish_event(event).await;

        let mut got = labels(&log);
        got.sort();
        assert_eq!(got, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_and_keeps_position() {
        let state = SharedWorldState::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        state.subscribe("a", recorder("old-a", &log)).await;
        state.subscribe("b", recorder("b", &log)).await;
        state.subscribe("a", recorder("new-a", &log)).await;

        state.publish_event(Event::new(EventKind::Custom("ping".into()), "test")).await;

        assert_eq!(labels(&log), vec!["new-a", "b"]);
    }

    #[tokio::test]
    async fn test_agents_list_populates_directory() {
        let state = SharedWorldState::new();
        state
            .update(
                AGENTS_KEY,
                json!([
                    {"name": "alice", "description": "CEO"},
                    {"name": "bob", "description": "CTO", "status": "busy"},
                    {"description": "nameless"}
                ]),
            )
            .await;

        let agents = state.get_agents().await;
        assert_eq!(agents.len(), 3);
        assert!(agents["alice"].active);
        assert_eq!(agents["alice"].status, "initialized");
        assert_eq!(agents["alice"].field("description"), Some(&json!("CEO")));
        assert_eq!(agents["bob"].status, "busy");
        assert!(agents.contains_key("unknown"));
    }

    #[tokio::test]
    async fn test_agent_key_merges_and_creates() {
        let state = SharedWorldState::new();
        state
            .update(&agent_key("alice"), json!({"active": true, "status": "ready"}))
            .await;
        state
            .update(&agent_key("alice"), json!({"last_action": "hired bob"}))
            .await;

        let record = state.get_agent_state("alice").await;
        assert_eq!(record.id, "alice");
        assert!(record.active);
        assert_eq!(record.status, "ready");
        assert_eq!(record.last_action.as_deref(), Some("hired bob"));

        assert!(state.get_agent_state("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_get_agents_is_a_copy() {
        let state = SharedWorldState::new();
        state.update(&agent_key("alice"), json!({"active": true})).await;

        let mut copy = state.get_agents().await;
        copy.remove("alice");

        assert_eq!(state.get_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_records_carry_write_order() {
        let state = SharedWorldState::new();
        state.update(&agent_key("zed"), json!({"mood": "calm"})).await;
        state.update(&agent_key("amy"), json!({"mood": "busy"})).await;
        state.update("weather", json!("rain")).await;

        let agents = state.get_agents().await;
        assert!(agents["amy"].revision > agents["zed"].revision);

        state.update(&agent_key("zed"), json!({"mood": "tense"})).await;
        let agents = state.get_agents().await;
        assert!(agents["zed"].revision > agents["amy"].revision);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["weather"], json!("rain"));
        assert_eq!(snapshot[&agent_key("zed")], json!({"mood": "tense"}));
    }

    #[tokio::test]
    async fn test_bare_prefix_is_a_plain_key() {
        let state = SharedWorldState::new();
        state.update(AGENT_KEY_PREFIX, json!({"active": true})).await;

        assert!(state.get_agents().await.is_empty());
        assert_eq!(state.get(AGENT_KEY_PREFIX).await, Some(json!({"active": true})));
    }

    /// Handler that writes back into the store it is called from.
    struct Echo {
        state: Arc<SharedWorldState>,
    }

    #[async_trait]
    impl EventHandler for Echo {
        async fn handle(&self, event: &Event) {
            if event.kind == EventKind::Custom("ping".into()) {
                self.state.update("echo", json!(true)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_handlers_may_reenter_the_store() {
        let state = SharedWorldState::shared();
        state
            .subscribe("echo", Arc::new(Echo { state: Arc::clone(&state) }))
            .await;

        state.publish_event(Event::new(EventKind::Custom("ping".into()), "test")).await;

        assert_eq!(state.get("echo").await, Some(json!(true)));
    }
}
