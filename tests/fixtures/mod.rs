//! Shared fixture builders for the integration tests.
#![allow(dead_code)]

use std::time::Duration;

use fleet_planner::config::{
    FirstSolutionStrategy, LocationsConfig, Metaheuristic, SolverType,
};
use fleet_planner::gateway::RoutingGateway;
use fleet_planner::geo::Coordinate;
use fleet_planner::haversine::HaversineGateway;
use fleet_planner::matrix::Matrix;
use fleet_planner::model::{Customer, VehicleClass, VehicleSpec};
use fleet_planner::solver::cost::DropPolicy;
use fleet_planner::solver::SolverSettings;

pub fn coord(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).expect("fixture coordinate in range")
}

pub fn customer(id: &str, lat: f64, lon: f64, volume: f64) -> Customer {
    Customer {
        id: id.to_string(),
        name: format!("Customer {}", id),
        coordinate: coord(lat, lon),
        volume,
    }
}

/// Builder for vehicle specs with sensible defaults.
#[derive(Clone)]
pub struct VehicleBuilder {
    spec: VehicleSpec,
}

impl VehicleBuilder {
    pub fn new(class: VehicleClass, capacity: u32) -> Self {
        Self {
            spec: VehicleSpec {
                class,
                capacity,
                count: 1,
                max_distance_m: None,
                max_time_minutes: 8 * 60,
                service_minutes: Some(0),
                start_minute: None,
                max_stops: None,
                enabled: true,
                start_depot: coord(42.70, 23.32),
                tsp_origin: None,
            },
        }
    }

    pub fn count(mut self, count: u32) -> Self {
        self.spec.count = count;
        self
    }

    pub fn depot(mut self, lat: f64, lon: f64) -> Self {
        self.spec.start_depot = coord(lat, lon);
        self
    }

    pub fn tsp_origin(mut self, lat: f64, lon: f64) -> Self {
        self.spec.tsp_origin = Some(coord(lat, lon));
        self
    }

    pub fn max_stops(mut self, stops: usize) -> Self {
        self.spec.max_stops = Some(stops);
        self
    }

    pub fn max_distance_m(mut self, meters: i64) -> Self {
        self.spec.max_distance_m = Some(meters);
        self
    }

    pub fn max_time_minutes(mut self, minutes: u32) -> Self {
        self.spec.max_time_minutes = minutes;
        self
    }

    pub fn service_minutes(mut self, minutes: u32) -> Self {
        self.spec.service_minutes = Some(minutes);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.spec.enabled = false;
        self
    }

    pub fn build(self) -> VehicleSpec {
        self.spec
    }
}

/// Great-circle matrix over the given coordinates; good enough for scenario
/// tests that only care about relative geometry.
pub fn build_matrix(coordinates: &[Coordinate]) -> Matrix {
    let gateway = HaversineGateway::default();
    let chunk = gateway
        .table(coordinates, coordinates, None)
        .expect("haversine table never fails");
    Matrix::new(coordinates.to_vec(), chunk.distances_m, chunk.durations_s, 0)
}

/// Zone configuration centered on Sofia with the production defaults.
pub fn sofia_locations() -> LocationsConfig {
    serde_json::from_str(
        r#"{
            "center_location": {"lat": 42.6977, "lon": 23.3219},
            "center_zone_radius_km": 2.0,
            "city_center_coords": {"lat": 42.6977, "lon": 23.3219},
            "city_traffic_radius_km": 7.0,
            "city_traffic_duration_multiplier": 1.4
        }"#,
    )
    .expect("fixture locations config parses")
}

/// Short-budget solver settings so the suite stays fast.
pub fn quick_settings(solver_type: SolverType, allow_skipping: bool) -> SolverSettings {
    SolverSettings {
        solver_type,
        time_limit: Duration::from_millis(600),
        drop: DropPolicy {
            allowed: allow_skipping,
            base_penalty: 100_000,
            demand_coefficient: 0,
        },
        parallel: false,
        workers: 1,
        first_solution_strategies: vec![
            FirstSolutionStrategy::Savings,
            FirstSolutionStrategy::ParallelCheapestInsertion,
        ],
        metaheuristics: vec![Metaheuristic::GuidedLocalSearch],
        lambda: 0.1,
        lns_time_limit: Duration::from_millis(100),
        lns_num_nodes: 5,
        lns_num_arcs: 10,
    }
}
