//! World configuration: the structured description a world is built from.
//!
//! A configuration is parsed and validated once, at construction time.
//! Anything malformed is a `SwarmError::Configuration` and no world is built
//! from it.

use hive_env::{ReasoningService, SwarmError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// A directed relationship from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Name of the other agent
    pub to: String,

    /// Free-form relationship type ("reports_to", "rival", ...)
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Configuration slice of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Open, free-form properties
    #[serde(default)]
    pub properties: Map<String, Value>,

    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl AgentProfile {
    /// Creates a profile with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            properties: Map::new(),
            relationships: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a free-form property.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Adds a relationship.
    pub fn with_relationship(mut self, to: impl Into<String>, kind: impl Into<String>) -> Self {
        self.relationships.push(Relationship {
            to: to.into(),
            kind: kind.into(),
        });
        self
    }

    /// Returns the names this agent has relationships with.
    pub fn related_agents(&self) -> Vec<String> {
        self.relationships.iter().map(|r| r.to.clone()).collect()
    }
}

/// Everything needed to construct one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub world_description: String,

    pub agents: Vec<AgentProfile>,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub initial_state: Map<String, Value>,
}

/// World section of an analysis response.
#[derive(Debug, Deserialize)]
struct WorldAnalysis {
    description: String,
    #[serde(default)]
    characteristics: Vec<String>,
    #[serde(default)]
    rules: Vec<String>,
}

/// Full analysis response.
#[derive(Debug, Deserialize)]
struct Analysis {
    world: WorldAnalysis,
    agents: Vec<AgentProfile>,
}

impl WorldConfig {
    /// Creates a configuration from parts and validates it.
    pub fn new(
        world_description: impl Into<String>,
        agents: Vec<AgentProfile>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, SwarmError> {
        let config = Self {
            world_description: world_description.into(),
            agents,
            system_prompt: system_prompt.into(),
            initial_state: Map::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Adds an initial state entry.
    pub fn with_initial(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_state.insert(key.into(), value);
        self
    }

    /// Parses and validates a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SwarmError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| SwarmError::config(format!("invalid world config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SwarmError::config(format!("read config file failed ({}): {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Asks the reasoning service to analyze a free-form world description
    /// and builds a configuration from its answer.
    pub async fn from_prompt(
        service: &dyn ReasoningService,
        prompt: &str,
    ) -> Result<Self, SwarmError> {
        let response = service.complete(&analysis_prompt(prompt)).await?;
        Self::from_analysis(prompt, &response)
    }

    /// Builds a configuration from an analysis response.
    ///
    /// The response may wrap the JSON object in other text; the outermost
    /// `{ ... }` span is parsed.
    pub fn from_analysis(prompt: &str, response: &str) -> Result<Self, SwarmError> {
        let (start, end) = match (response.find('{'), response.rfind('}')) {
            (Some(start), Some(end)) if end > start => (start, end),
            _ => {
                warn!(response_len = response.len(), "No JSON object in analysis response");
                return Err(SwarmError::config("no JSON object found in response"));
            }
        };

        let analysis: Analysis = serde_json::from_str(&response[start..=end])
            .map_err(|e| SwarmError::config(format!("malformed world analysis: {}", e)))?;
        debug!(agents = analysis.agents.len(), "Parsed world analysis");

        let system_prompt = build_system_prompt(&analysis.world);
        let agents_value = serde_json::to_value(&analysis.agents)?;

        let mut initial_state = Map::new();
        initial_state.insert("world_description".into(), json!(prompt));
        initial_state.insert(
            "world_analysis".into(),
            json!({
                "description": analysis.world.description,
                "characteristics": analysis.world.characteristics,
                "rules": analysis.world.rules,
            }),
        );
        initial_state.insert("active_agents".into(), json!(0));
        initial_state.insert("simulation_status".into(), json!("initializing"));
        initial_state.insert("agents".into(), agents_value);

        let config = Self {
            world_description: prompt.to_string(),
            agents: analysis.agents,
            system_prompt,
            initial_state,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks structural invariants.
    pub fn validate(&self) -> Result<(), SwarmError> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(SwarmError::config("agent with empty name"));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(SwarmError::config(format!("duplicate agent name: {}", agent.name)));
            }
            if agent.relationships.iter().any(|r| r.to.trim().is_empty()) {
                return Err(SwarmError::config(format!(
                    "agent {} has a relationship without a target",
                    agent.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the profile of the named agent.
    pub fn agent(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.name == name)
    }
}

fn analysis_prompt(prompt: &str) -> String {
    format!(
        "Analyze the following world description and return a JSON object with this shape:\n\
         {{\"world\": {{\"description\": str, \"characteristics\": [str], \"rules\": [str]}},\n\
          \"agents\": [{{\"name\": str, \"description\": str, \"properties\": {{}}, \
         \"relationships\": [{{\"to\": str, \"type\": str}}]}}]}}\n\n\
         World description:\n{}",
        prompt
    )
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_system_prompt(world: &WorldAnalysis) -> String {
    format!(
        "You are participating in an imaginative world simulation. This world is defined as:\n\n\
         {}\n\nKey characteristics:\n{}\n\nRules:\n{}\n\n\
         When you observe the world, describe what you see in rich detail. When you perform \
         actions, narrate them in the style of the simulation. Stay in character as your \
         assigned entity.",
        world.description,
        bullets(&world.characteristics),
        bullets(&world.rules)
    )
}
