//! Planner configuration.
//!
//! A closed record: unknown keys fail loudly at load time instead of being
//! silently carried along. Defaults mirror the production deployment around
//! Sofia.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::Coordinate;
use crate::model::VehicleSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which road-network provider to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingEngine {
    Static,
    TimeDependent,
}

/// Which CVRP backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    BackendA,
    BackendB,
}

/// First-solution construction heuristics for backend A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstSolutionStrategy {
    Savings,
    PathCheapestArc,
    CheapestInsertion,
    ParallelCheapestInsertion,
    /// Route-first, cluster-second construction.
    Christofides,
}

/// Improvement metaheuristics for backend A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metaheuristic {
    GuidedLocalSearch,
    SimulatedAnnealing,
    TabuSearch,
    Automatic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    pub engine: RoutingEngine,
    #[serde(default)]
    pub enable_time_dependent: bool,
    /// Departure time "HH:MM"; honored only by the time-dependent engine.
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default = "default_static_url")]
    pub static_url: String,
    #[serde(default = "default_time_dependent_url")]
    pub time_dependent_url: String,
    #[serde(default = "default_costing_profile")]
    pub costing_profile: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_static_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_time_dependent_url() -> String {
    "http://localhost:8002".to_string()
}

fn default_costing_profile() -> String {
    "driving".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            engine: RoutingEngine::Static,
            enable_time_dependent: false,
            departure_time: None,
            static_url: default_static_url(),
            time_dependent_url: default_time_dependent_url(),
            costing_profile: default_costing_profile(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationsConfig {
    /// Center of the preferred-vehicle zone.
    pub center_location: Coordinate,
    #[serde(default = "default_center_zone_radius")]
    pub center_zone_radius_km: f64,
    #[serde(default = "default_true")]
    pub enable_center_zone_restrictions: bool,
    /// Penalty in meter units for a center-class vehicle serving a customer
    /// outside the zone, and base penalty for other classes entering it.
    #[serde(default = "default_center_penalty")]
    pub center_penalty_m: i64,
    #[serde(default = "default_center_discount")]
    pub center_discount_in_zone: f64,
    #[serde(default = "default_multiplier_one")]
    pub external_bus_center_penalty_multiplier: f64,
    #[serde(default = "default_multiplier_one")]
    pub internal_bus_center_penalty_multiplier: f64,

    /// Center of the traffic-congested urban disk (usually wider than the
    /// center zone).
    pub city_center_coords: Coordinate,
    #[serde(default = "default_city_traffic_radius")]
    pub city_traffic_radius_km: f64,
    #[serde(default = "default_traffic_multiplier")]
    pub city_traffic_duration_multiplier: f64,
    #[serde(default = "default_true")]
    pub enable_city_traffic_adjustment: bool,
}

fn default_center_zone_radius() -> f64 {
    2.0
}

fn default_center_penalty() -> i64 {
    40_000
}

fn default_center_discount() -> f64 {
    0.5
}

fn default_multiplier_one() -> f64 {
    1.0
}

fn default_city_traffic_radius() -> f64 {
    7.0
}

fn default_traffic_multiplier() -> f64 {
    1.35
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CvrpConfig {
    #[serde(default = "default_solver_type")]
    pub solver_type: SolverType,
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    #[serde(default)]
    pub allow_customer_skipping: bool,
    /// Fixed dropping penalty in meter units (simple mode).
    #[serde(default = "default_drop_penalty")]
    pub distance_penalty_disjunction: i64,
    /// Prize mode: dropping cost = base + demand * k. Zero k means simple mode.
    #[serde(default)]
    pub prize_demand_coefficient: i64,
    #[serde(default)]
    pub enable_parallel_solving: bool,
    /// -1 means cores - 1.
    #[serde(default = "default_num_workers")]
    pub num_workers: i32,
    #[serde(default = "default_first_solution_strategies")]
    pub first_solution_strategies: Vec<FirstSolutionStrategy>,
    #[serde(default = "default_metaheuristics")]
    pub metaheuristics: Vec<Metaheuristic>,
    #[serde(default = "default_lns_time_limit")]
    pub lns_time_limit_seconds: u64,
    #[serde(default = "default_lns_num_nodes")]
    pub lns_num_nodes: usize,
    #[serde(default = "default_lns_num_arcs")]
    pub lns_num_arcs: usize,
    #[serde(default = "default_gls_lambda")]
    pub search_lambda_coefficient: f64,
    #[serde(default)]
    pub enable_final_depot_reconfiguration: bool,
}

fn default_solver_type() -> SolverType {
    SolverType::BackendA
}

fn default_time_limit() -> u64 {
    30
}

fn default_drop_penalty() -> i64 {
    100_000
}

fn default_num_workers() -> i32 {
    -1
}

fn default_first_solution_strategies() -> Vec<FirstSolutionStrategy> {
    vec![
        FirstSolutionStrategy::Savings,
        FirstSolutionStrategy::PathCheapestArc,
        FirstSolutionStrategy::ParallelCheapestInsertion,
    ]
}

fn default_metaheuristics() -> Vec<Metaheuristic> {
    vec![Metaheuristic::GuidedLocalSearch, Metaheuristic::SimulatedAnnealing]
}

fn default_lns_time_limit() -> u64 {
    5
}

fn default_lns_num_nodes() -> usize {
    20
}

fn default_lns_num_arcs() -> usize {
    40
}

fn default_gls_lambda() -> f64 {
    0.1
}

impl Default for CvrpConfig {
    fn default() -> Self {
        Self {
            solver_type: default_solver_type(),
            time_limit_seconds: default_time_limit(),
            allow_customer_skipping: false,
            distance_penalty_disjunction: default_drop_penalty(),
            prize_demand_coefficient: 0,
            enable_parallel_solving: false,
            num_workers: default_num_workers(),
            first_solution_strategies: default_first_solution_strategies(),
            metaheuristics: default_metaheuristics(),
            lns_time_limit_seconds: default_lns_time_limit(),
            lns_num_nodes: default_lns_num_nodes(),
            lns_num_arcs: default_lns_num_arcs(),
            search_lambda_coefficient: default_gls_lambda(),
            enable_final_depot_reconfiguration: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// Per-customer policy ceiling: anything larger goes straight to the
    /// warehouse regardless of fleet capacity.
    #[serde(default = "default_policy_volume_cap")]
    pub policy_volume_cap: f64,
}

fn default_policy_volume_cap() -> f64 {
    385.0
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            policy_volume_cap: default_policy_volume_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_dir")]
    pub directory: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cache_ttl() -> u64 {
    24 * 3600
}

fn default_cache_dir() -> String {
    ".matrix-cache".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            directory: default_cache_dir(),
            enabled: true,
        }
    }
}

/// The complete planner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannerConfig {
    pub routing: RoutingConfig,
    pub locations: LocationsConfig,
    pub vehicles: Vec<VehicleSpec>,
    #[serde(default)]
    pub cvrp: CvrpConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vehicles.is_empty() {
            return Err(ConfigError::Invalid("no vehicles configured".into()));
        }
        for (i, spec) in self.vehicles.iter().enumerate() {
            if spec.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "vehicle {} has zero capacity",
                    i
                )));
            }
            if spec.max_time_minutes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "vehicle {} has zero time budget",
                    i
                )));
            }
        }
        if self.locations.city_traffic_duration_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "city_traffic_duration_multiplier must be >= 1".into(),
            ));
        }
        if self.locations.center_discount_in_zone <= 0.0 {
            return Err(ConfigError::Invalid(
                "center_discount_in_zone must be positive".into(),
            ));
        }
        if let Some(departure) = &self.routing.departure_time {
            parse_departure_minutes(departure).ok_or_else(|| {
                ConfigError::Invalid(format!("bad departure_time {:?}", departure))
            })?;
        }
        Ok(())
    }

    /// Effective solver worker count for the multi-strategy mode.
    pub fn solver_workers(&self) -> usize {
        if self.cvrp.num_workers < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1)
        } else {
            (self.cvrp.num_workers as usize).max(1)
        }
    }
}

/// Parse "HH:MM" into minutes from midnight.
pub fn parse_departure_minutes(value: &str) -> Option<u32> {
    let (hh, mm) = value.split_once(':')?;
    let hours: u32 = hh.parse().ok()?;
    let minutes: u32 = mm.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}
