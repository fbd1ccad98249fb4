//! Common types shared by every layer of a Hive world.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Source identifier used for events emitted by the state store itself.
pub const STATE_MANAGER_SOURCE: &str = "state_manager";

/// Type tag of an event.
///
/// Known tags get their own variant; anything else travels as `Custom` so
/// that monitors and scenario code can define their own notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// A key in the shared state was written
    StateChanged,
    /// An agent joined a world
    AgentSpawned,
    /// An agent completed a decide/act cycle
    AgentAction,
    /// A world instance was constructed
    WorldCreated,
    /// A world began running
    WorldStarted,
    /// A world finished its stop sequence
    WorldStopped,
    /// Application-defined event type
    Custom(String),
}

impl EventKind {
    /// Returns the wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StateChanged => "state_changed",
            EventKind::AgentSpawned => "agent_spawned",
            EventKind::AgentAction => "agent_action",
            EventKind::WorldCreated => "world_created",
            EventKind::WorldStarted => "world_started",
            EventKind::WorldStopped => "world_stopped",
            EventKind::Custom(tag) => tag,
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "state_changed" => EventKind::StateChanged,
            "agent_spawned" => EventKind::AgentSpawned,
            "agent_action" => EventKind::AgentAction,
            "world_created" => EventKind::WorldCreated,
            "world_started" => EventKind::WorldStarted,
            "world_stopped" => EventKind::WorldStopped,
            _ => EventKind::Custom(tag),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed, sourced notification.
///
/// An event with no target set (or an empty one) is a broadcast; otherwise
/// only the listed subscribers receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Type tag
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Payload
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Identifier of the emitting agent, world or store
    pub source: String,

    /// Subscribers this event is restricted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<BTreeSet<String>>,
}

impl Event {
    /// Creates a broadcast event with an empty payload.
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            data: Map::new(),
            source: source.into(),
            targets: None,
        }
    }

    /// Adds a payload field.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Restricts delivery to the given subscribers.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if every subscriber receives this event.
    pub fn is_broadcast(&self) -> bool {
        self.targets.as_ref().map_or(true, |t| t.is_empty())
    }
}

/// An agent's entry in the derived agent directory.
///
/// `id`, `active`, `status` and `last_action` are typed; every other field
/// merged into the record lands in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub last_action: Option<String>,

    /// Store write sequence of the last merge into this record
    #[serde(default)]
    pub revision: u64,

    /// Arbitrary merged configuration fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AgentRecord {
    /// Creates an inactive record for the given agent.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Returns true for the placeholder returned for unknown agents.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merges a value into this record, last write wins per field.
    ///
    /// Objects are merged key by key. Any other value is kept under the
    /// `value` field. A record's `id` is fixed once set.
    pub fn merge(&mut self, value: &Value) {
        let Some(object) = value.as_object() else {
            self.fields.insert("value".to_string(), value.clone());
            return;
        };

        for (key, field) in object {
            match key.as_str() {
                "id" => {
                    if self.id.is_empty() {
                        if let Some(id) = field.as_str() {
                            self.id = id.to_string();
                        }
                    }
                }
                "active" => {
                    if let Some(active) = field.as_bool() {
                        self.active = active;
                    }
                }
                "status" => match field {
                    Value::String(status) => self.status = status.clone(),
                    other => self.status = other.to_string(),
                },
                "revision" => {
                    if let Some(revision) = field.as_u64() {
                        self.revision = revision;
                    }
                }
                "last_action" => {
                    self.last_action = match field {
                        Value::Null => None,
                        Value::String(text) => Some(text.clone()),
                        other => Some(other.to_string()),
                    };
                }
                _ => {
                    self.fields.insert(key.clone(), field.clone());
                }
            }
        }
    }

    /// Returns a free-form field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
