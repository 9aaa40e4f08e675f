//! Planner configuration.
//!
//! Every field has a default so a partial JSON document is enough to override
//! only what a deployment cares about.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{HubId, Location};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Split large problems by hub and solve the regions in parallel.
    pub regional_partitioning: bool,
    /// Depot used for the standing (non-regional) problem.
    pub depot: Location,
    pub hubs: Vec<HubConfig>,
    pub solver: SolverConfig,
    pub gatekeeper: GatekeeperConfig,
    pub tokens: TokenConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            regional_partitioning: false,
            depot: Location::new(52.2297, 21.0122),
            hubs: Vec::new(),
            solver: SolverConfig::default(),
            gatekeeper: GatekeeperConfig::default(),
            tokens: TokenConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubKind {
    #[default]
    MainHub,
    MidiHub,
    MicroHub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub id: HubId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: HubKind,
    pub location: Location,
    pub catchment_radius_km: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_max_vehicles")]
    pub max_vehicles: u32,
}

impl HubConfig {
    pub fn new(id: impl Into<HubId>, location: Location, catchment_radius_km: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: HubKind::MainHub,
            location,
            catchment_radius_km,
            active: true,
            max_vehicles: default_max_vehicles(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_vehicles() -> u32 {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget for one engine run.
    pub time_budget_ms: u64,
    /// Maximum local-search passes after construction.
    pub local_search_iterations: usize,
    /// Worker threads for regional solving.
    pub regional_threads: usize,
    /// Route start time, seconds from midnight.
    pub shift_start_secs: i32,
    /// Service time spent at each stop.
    pub service_minutes: i32,
    pub speed_kmh: f64,
    /// Fuel cost per km in minor currency units.
    pub fuel_cost_per_km: i64,
    /// Driver cost per hour in minor currency units.
    pub driver_cost_per_hour: i64,
    /// Soft penalty per stop left unassigned.
    pub unassigned_penalty: i64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 30_000,
            local_search_iterations: 100,
            regional_threads: 16,
            shift_start_secs: 8 * 3600,
            service_minutes: 5,
            speed_kmh: 40.0,
            fuel_cost_per_km: 50,
            driver_cost_per_hour: 6_000,
            unassigned_penalty: 10_000,
        }
    }
}

impl SolverConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub enabled: bool,
    /// Absolute soft-score change (percent) above which review is required.
    pub score_threshold_percent: f64,
    /// Route-count change above which review is required.
    pub max_route_count_delta: usize,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold_percent: 20.0,
            max_route_count_delta: 2,
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub ttl_hours: i64,
    pub claim_base_url: String,
    /// Endpoint that delivers claim links to drivers (email/push relay).
    pub notify_webhook_url: Option<String>,
    pub notify_timeout_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            claim_base_url: "http://localhost:5174/claim".to_string(),
            notify_webhook_url: None,
            notify_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlannerConfig::from_json_str(
            r#"{
                "regional_partitioning": true,
                "hubs": [
                    {"id": "HUB_WAW", "location": {"lat": 52.23, "lon": 21.01}, "catchment_radius_km": 30.0}
                ],
                "gatekeeper": {"score_threshold_percent": 15.0}
            }"#,
        )
        .unwrap();

        assert!(config.regional_partitioning);
        assert_eq!(config.hubs.len(), 1);
        assert!(config.hubs[0].active);
        assert_eq!(config.hubs[0].max_vehicles, 16);
        assert_eq!(config.gatekeeper.score_threshold_percent, 15.0);
        assert_eq!(config.gatekeeper.max_route_count_delta, 2);
        assert_eq!(config.solver, SolverConfig::default());
        assert_eq!(config.tokens.ttl_hours, 24);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = PlannerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PlannerConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
