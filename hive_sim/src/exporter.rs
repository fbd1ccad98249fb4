//! JSON export of a parallel run.

use crate::work::WorldReport;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use uuid::Uuid;

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Unique id of this run
    pub run_id: String,

    /// Scenario name, if a preset was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    pub workers: usize,

    pub item_timeout_secs: f64,

    /// Worlds submitted
    pub requested: usize,

    /// Worlds that errored or timed out
    pub omitted: usize,

    pub reports: Vec<WorldReport>,
}

impl RunExport {
    /// Creates a new export container.
    pub fn new(scenario: Option<&str>, workers: usize, item_timeout_secs: f64, requested: usize) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            scenario: scenario.map(str::to_string),
            workers,
            item_timeout_secs,
            requested,
            omitted: requested,
            reports: Vec::new(),
        }
    }

    /// Records the completed reports.
    pub fn finalize(&mut self, reports: Vec<WorldReport>) {
        self.omitted = self.requested.saturating_sub(reports.len());
        self.reports = reports;
    }

    pub fn total_actions(&self) -> u64 {
        self.reports.iter().map(|r| r.actions).sum()
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
