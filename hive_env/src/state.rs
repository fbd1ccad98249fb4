//! Shared world state abstraction.

use crate::types::{AgentRecord, Event};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Callback registered by a subscriber.
///
/// Handlers are awaited one after another by the publisher, so a slow
/// handler delays every later subscriber and the publisher itself.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one delivered event.
    async fn handle(&self, event: &Event);
}

/// The capability set through which agents coordinate.
///
/// Agents hold no reference to each other. Everything they learn about the
/// world and each other comes through this store and its event bus.
///
/// # Implementations
///
/// - **In-memory**: `hive_core::SharedWorldState` - the reference store
///
/// # Delivery
///
/// ```text
/// publisher                    store                      subscribers
///   |-- publish_event(e) ------->|                             |
///   |                            |-- handle(e) --> A (await) ->|
///   |                            |-- handle(e) --> B (await) ->|
///   |<------- returns -----------|                             |
/// ```
///
/// None of the operations fail: missing keys read as `None`, missing
/// subscribers are skipped.
#[async_trait]
pub trait WorldState: Send + Sync + 'static {
    /// Writes `value` at `key` and broadcasts a `state_changed` event.
    ///
    /// `"agents"` (a list) and `"agent_<id>"` additionally merge into the
    /// agent directory.
    async fn update(&self, key: &str, value: Value);

    /// Returns the current value at `key`, or `None` if never written.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Delivers an event to its targets, or to every subscriber when it has
    /// none, awaiting each handler in turn.
    async fn publish_event(&self, event: Event);

    /// Registers `handler` for `id`, replacing any previous handler.
    async fn subscribe(&self, id: &str, handler: Arc<dyn EventHandler>);

    /// Removes the subscription for `id`, if any.
    async fn unsubscribe(&self, id: &str);

    /// Returns a copy of the agent directory.
    async fn get_agents(&self) -> BTreeMap<String, AgentRecord>;

    /// Returns one agent's record, or an empty record if unknown.
    async fn get_agent_state(&self, id: &str) -> AgentRecord;
}
