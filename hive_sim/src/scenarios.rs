//! Preset scenarios: demo worlds and the metric sets that go with them.

use hive_core::config::{AgentProfile, WorldConfig};
use hive_core::metrics::{Aggregation, MetricDefinition, MetricKind, TargetDirection};
use hive_env::SwarmError;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioId {
    /// Product company with leadership and delivery roles
    Organization,

    /// City planning between government, developers and residents
    Urban,

    /// National economy with a central bank, treasury and markets
    Economic,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Organization, ScenarioId::Urban, ScenarioId::Economic]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Organization => "organization",
            ScenarioId::Urban => "urban",
            ScenarioId::Economic => "economic",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Organization => "A growing product company shipping on a weekly cadence",
            ScenarioId::Urban => "A mid-sized city balancing growth, transit and green space",
            ScenarioId::Economic => "A national economy steered by monetary and fiscal policy",
        }
    }

    /// Metric set tracked for this scenario.
    pub fn metrics(&self) -> Vec<MetricDefinition> {
        use Aggregation::{Average, Latest};
        use MetricKind::{Numeric, Percentage};
        use TargetDirection::{Maximize, Minimize, Target};

        let metric = |name: &str, description: &str, kind, initial, aggregation, target, direction| {
            MetricDefinition::new(name, description, kind, initial)
                .aggregated(aggregation)
                .targeting(target, direction)
        };

        match self {
            ScenarioId::Organization => vec![
                metric("employee_satisfaction", "Average employee happiness score", Numeric, json!(75), Average, json!(85), Maximize),
                metric("team_productivity", "Overall team productivity index", Percentage, json!(100), Latest, json!(120), Maximize),
                metric("project_completion_rate", "Rate of project milestone completion", Percentage, json!(0), Latest, json!(90), Maximize),
                metric("communication_effectiveness", "Team communication effectiveness score", Numeric, json!(70), Average, json!(85), Maximize),
            ],
            ScenarioId::Urban => vec![
                metric("carbon_footprint", "City carbon emissions (tons CO2)", Numeric, json!(1_000_000), Latest, json!(500_000), Minimize),
                metric("quality_of_life", "Citizen quality of life index", Numeric, json!(70), Average, json!(85), Maximize),
                metric("traffic_congestion", "Average traffic congestion level", Percentage, json!(45), Average, json!(20), Minimize),
                metric("green_space_coverage", "Percentage of city area as green space", Percentage, json!(15), Latest, json!(30), Maximize),
            ],
            ScenarioId::Economic => vec![
                metric("gdp_growth", "GDP growth rate", Percentage, json!(2.5), Latest, json!(3.5), Maximize),
                metric("inflation_rate", "Annual inflation rate", Percentage, json!(2.0), Latest, json!(2.0), Target),
                metric("unemployment_rate", "Unemployment rate", Percentage, json!(5.0), Latest, json!(4.0), Minimize),
                metric("income_inequality", "Gini coefficient", Numeric, json!(0.38), Latest, json!(0.35), Minimize),
            ],
        }
    }

    /// Demo world for this scenario.
    pub fn config(&self) -> Result<WorldConfig, SwarmError> {
        let agents = match self {
            ScenarioId::Organization => vec![
                AgentProfile::named("ceo")
                    .with_description("Sets company strategy and allocates resources")
                    .with_property("employee_satisfaction", json!(80))
                    .with_property("communication_effectiveness", json!(75))
                    .with_relationship("head_of_product", "manages")
                    .with_relationship("head_of_engineering", "manages"),
                AgentProfile::named("head_of_product")
                    .with_description("Owns the roadmap and feature prioritization")
                    .with_property("employee_satisfaction", json!(72))
                    .with_property("team_productivity", json!(105))
                    .with_relationship("ceo", "reports_to")
                    .with_relationship("head_of_engineering", "peer"),
                AgentProfile::named("head_of_engineering")
                    .with_description("Owns technical architecture and delivery")
                    .with_property("employee_satisfaction", json!(68))
                    .with_property("project_completion_rate", json!(40))
                    .with_relationship("ceo", "reports_to")
                    .with_relationship("head_of_product", "peer"),
            ],
            ScenarioId::Urban => vec![
                AgentProfile::named("mayor")
                    .with_description("Sets city policy and budget priorities")
                    .with_property("quality_of_life", json!(70))
                    .with_relationship("transit_authority", "oversees"),
                AgentProfile::named("developer")
                    .with_description("Builds housing and commercial space")
                    .with_property("carbon_footprint", json!(950_000))
                    .with_relationship("mayor", "lobbies"),
                AgentProfile::named("transit_authority")
                    .with_description("Runs buses and light rail")
                    .with_property("traffic_congestion", json!(42))
                    .with_property("green_space_coverage", json!(16))
                    .with_relationship("mayor", "reports_to"),
            ],
            ScenarioId::Economic => vec![
                AgentProfile::named("central_bank")
                    .with_description("Sets interest rates to hold inflation near target")
                    .with_property("inflation_rate", json!(2.4))
                    .with_relationship("treasury", "coordinates"),
                AgentProfile::named("treasury")
                    .with_description("Manages public spending and debt issuance")
                    .with_property("gdp_growth", json!(2.7))
                    .with_relationship("central_bank", "coordinates"),
                AgentProfile::named("labor_market")
                    .with_description("Aggregate employers and workers")
                    .with_property("unemployment_rate", json!(4.8))
                    .with_property("income_inequality", json!(0.37)),
            ],
        };

        let system_prompt = format!(
            "You are participating in a world simulation: {}. Stay in character and \
             describe concrete actions.",
            self.description()
        );
        Ok(WorldConfig::new(self.description(), agents, system_prompt)?
            .with_initial("scenario", json!(self.name())))
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" | "org" | "company" => Ok(ScenarioId::Organization),
            "urban" | "city" => Ok(ScenarioId::Urban),
            "economic" | "economy" => Ok(ScenarioId::Economic),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
