//! Hive Metrics Module
//! ===================
//!
//! Named aggregate values recomputed from the agent directory:
//! - **Definitions** describe a metric's kind, aggregation and optional target
//! - **Extractors** turn the current agent directory into one sample
//! - **Aggregations** reduce the recorded history to a current value
//!
//! Targets are reporting metadata only; nothing in a world steers by them.

use hive_env::{AgentRecord, SwarmError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Kind of value a metric holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Numeric,
    Percentage,
    Categorical,
}

/// How recorded values reduce to a current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Latest,
    Average,
    Sum,
}

impl Aggregation {
    /// Applies the aggregation to a history of values.
    ///
    /// `Average` and `Sum` only consider numeric values and yield `None`
    /// when there are none.
    pub fn apply(&self, values: &[Value]) -> Option<Value> {
        match self {
            Aggregation::Latest => values.last().cloned(),
            Aggregation::Average | Aggregation::Sum => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    return None;
                }
                let sum: f64 = numbers.iter().sum();
                let out = match self {
                    Aggregation::Sum => sum,
                    _ => sum / numbers.len() as f64,
                };
                Some(json!(out))
            }
        }
    }
}

/// Which way a metric is supposed to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDirection {
    Maximize,
    Minimize,
    Target,
}

impl TargetDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetDirection::Maximize => "maximize",
            TargetDirection::Minimize => "minimize",
            TargetDirection::Target => "target",
        }
    }
}

/// Definition of a tracked metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub initial_value: Value,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_direction: Option<TargetDirection>,
}

impl MetricDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: MetricKind,
        initial_value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            initial_value,
            aggregation: Aggregation::Latest,
            target_value: None,
            target_direction: None,
        }
    }

    pub fn aggregated(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn targeting(mut self, value: Value, direction: TargetDirection) -> Self {
        self.target_value = Some(value);
        self.target_direction = Some(direction);
        self
    }
}

/// One recorded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Simulated seconds since the world started
    pub timestamp: f64,
    pub value: Value,
}

/// Direction of recent change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// One row of a metrics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReportRow {
    pub name: String,
    pub current: Option<Value>,
    pub trend: Trend,
    pub target: Option<String>,
}

/// Computes one sample of a metric from the agent directory.
pub type MetricExtractor =
    Arc<dyn Fn(&BTreeMap<String, AgentRecord>) -> Option<Value> + Send + Sync>;

/// Reads a metric field from a record, top-level first, then from the
/// configured `properties` object.
fn record_value<'a>(record: &'a AgentRecord, field: &str) -> Option<&'a Value> {
    record
        .field(field)
        .or_else(|| record.field("properties").and_then(|props| props.get(field)))
}

/// Default extractor: reads the field named like the metric from every
/// agent record. Numeric metrics average the numeric values, categorical
/// metrics take the value of the most recently written record.
pub fn field_extractor(name: &str, kind: MetricKind) -> MetricExtractor {
    let field = name.to_string();
    Arc::new(move |agents| {
        match kind {
            MetricKind::Categorical => agents
                .values()
                .filter_map(|record| record_value(record, &field).map(|v| (record.revision, v)))
                .max_by_key(|(revision, _)| *revision)
                .map(|(_, value)| value.clone()),
            MetricKind::Numeric | MetricKind::Percentage => {
                let values = agents.values().filter_map(|record| record_value(record, &field));
                let numbers: Vec<f64> = values.filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    None
                } else {
                    Some(json!(numbers.iter().sum::<f64>() / numbers.len() as f64))
                }
            }
        }
    })
}

/// Serialized form of a tracker.
#[derive(Debug, Serialize, Deserialize)]
struct TrackerFile {
    definitions: BTreeMap<String, MetricDefinition>,
    metrics: BTreeMap<String, Vec<MetricSample>>,
}

/// Tracks metric history for one world.
#[derive(Default)]
pub struct MetricsTracker {
    definitions: BTreeMap<String, MetricDefinition>,
    history: BTreeMap<String, Vec<MetricSample>>,
    extractors: HashMap<String, MetricExtractor>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker with the given definitions.
    pub fn with_definitions(definitions: &[MetricDefinition]) -> Self {
        let mut tracker = Self::new();
        for definition in definitions {
            tracker.define(definition.clone());
        }
        tracker
    }

    /// Defines a metric and records its initial value at time zero.
    ///
    /// Redefining a metric resets its history.
    pub fn define(&mut self, definition: MetricDefinition) {
        let name = definition.name.clone();
        self.history.insert(
            name.clone(),
            vec![MetricSample {
                timestamp: 0.0,
                value: definition.initial_value.clone(),
            }],
        );
        self.definitions.insert(name, definition);
    }

    /// Replaces how samples of `name` are extracted from the directory.
    pub fn register_extractor(&mut self, name: impl Into<String>, extractor: MetricExtractor) {
        self.extractors.insert(name.into(), extractor);
    }

    /// Records a value.
    pub fn record(&mut self, name: &str, value: Value, timestamp: f64) -> Result<(), SwarmError> {
        let history = self
            .history
            .get_mut(name)
            .ok_or_else(|| SwarmError::config(format!("metric {} not defined", name)))?;
        history.push(MetricSample { timestamp, value });
        Ok(())
    }

    /// Samples every metric from the agent directory. Metrics whose
    /// extractor yields nothing are skipped. Returns the number recorded.
    pub fn sample(&mut self, agents: &BTreeMap<String, AgentRecord>, timestamp: f64) -> usize {
        let mut recorded = 0;
        for (name, definition) in &self.definitions {
            let value = match self.extractors.get(name) {
                Some(extractor) => extractor(agents),
                None => field_extractor(name, definition.kind)(agents),
            };
            if let (Some(value), Some(history)) = (value, self.history.get_mut(name)) {
                history.push(MetricSample { timestamp, value });
                recorded += 1;
            }
        }
        recorded
    }

    /// Returns the aggregated current value of a metric.
    pub fn current_value(&self, name: &str) -> Option<Value> {
        let definition = self.definitions.get(name)?;
        let values: Vec<Value> = self.history.get(name)?.iter().map(|s| s.value.clone()).collect();
        definition.aggregation.apply(&values)
    }

    /// Compares the first and last of the most recent `window` samples.
    pub fn trend(&self, name: &str, window: usize) -> Trend {
        let Some(history) = self.history.get(name) else {
            return Trend::Stable;
        };
        let recent = &history[history.len().saturating_sub(window)..];
        if recent.len() < 2 {
            return Trend::Stable;
        }
        match (recent[0].value.as_f64(), recent[recent.len() - 1].value.as_f64()) {
            (Some(first), Some(last)) if last > first => Trend::Increasing,
            (Some(first), Some(last)) if last < first => Trend::Decreasing,
            _ => Trend::Stable,
        }
    }

    /// Returns the recorded history of a metric.
    pub fn history(&self, name: &str) -> &[MetricSample] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the metric definitions.
    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.values()
    }

    /// Returns current values keyed by metric name.
    pub fn current_values(&self) -> BTreeMap<String, Value> {
        self.definitions
            .keys()
            .filter_map(|name| self.current_value(name).map(|v| (name.clone(), v)))
            .collect()
    }

    /// Builds the report table.
    pub fn report(&self) -> Vec<MetricReportRow> {
        self.definitions
            .values()
            .map(|definition| MetricReportRow {
                name: definition.name.clone(),
                current: self.current_value(&definition.name),
                trend: self.trend(&definition.name, 5),
                target: definition.target_value.as_ref().map(|target| {
                    match definition.target_direction {
                        Some(direction) => format!("{} ({})", target, direction.as_str()),
                        None => target.to_string(),
                    }
                }),
            })
            .collect()
    }

    /// Writes definitions and history as JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SwarmError> {
        let file = TrackerFile {
            definitions: self.definitions.clone(),
            metrics: self.history.clone(),
        };
        let text = serde_json::to_string_pretty(&file)?;
        std::fs::write(path.as_ref(), text)
            .map_err(|e| SwarmError::config(format!("write metrics failed: {}", e)))
    }

    /// Loads definitions and history written by `save_to_file`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SwarmError::config(format!("read metrics failed: {}", e)))?;
        let file: TrackerFile = serde_json::from_str(&text)?;
        Ok(Self {
            definitions: file.definitions,
            history: file.metrics,
            extractors: HashMap::new(),
        })
    }
}
