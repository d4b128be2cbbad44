//! Core domain types: customers, fleet, routes, solutions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::geo::Coordinate;

/// A delivery customer. Immutable once validated; routes reference it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub coordinate: Coordinate,
    /// Demand volume in the fleet's capacity units.
    pub volume: f64,
}

/// Raw per-customer record as delivered by the ingest collaborator.
///
/// The `gps` string is parsed upstream; the core receives coordinates and
/// applies range, volume and duplicate checks.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub volume: f64,
}

/// Validate raw records into customers, dropping bad rows with a warning.
///
/// Duplicate ids are rejected (first occurrence wins). The returned problem
/// list preserves input order.
pub fn validate_customers(records: &[CustomerRecord]) -> (Vec<Customer>, Vec<RecordError>) {
    let mut customers = Vec::with_capacity(records.len());
    let mut problems = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for record in records {
        if !seen.insert(record.id.as_str()) {
            problems.push(RecordError::DuplicateId {
                id: record.id.clone(),
            });
            continue;
        }
        let Some(coordinate) = Coordinate::new(record.lat, record.lon) else {
            problems.push(RecordError::InvalidCoordinate {
                id: record.id.clone(),
                lat: record.lat,
                lon: record.lon,
            });
            continue;
        };
        if record.volume < 0.0 || !record.volume.is_finite() {
            problems.push(RecordError::InvalidVolume {
                id: record.id.clone(),
                volume: record.volume,
            });
            continue;
        }
        customers.push(Customer {
            id: record.id.clone(),
            name: record.name.clone(),
            coordinate,
            volume: record.volume,
        });
    }

    (customers, problems)
}

/// Closed set of vehicle classes. The center class is preferred inside the
/// center zone; all other classes pay an entry penalty there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Internal,
    Center,
    External,
    Special,
    Regional,
}

impl VehicleClass {
    /// Default service minutes per stop for the class.
    pub fn default_service_minutes(self) -> u32 {
        match self {
            VehicleClass::Center => 10,
            VehicleClass::Regional => 20,
            _ => 15,
        }
    }

    /// Default departure as minute-of-day.
    pub fn default_start_minute(self) -> u32 {
        match self {
            VehicleClass::Regional => 6 * 60,
            _ => 8 * 60,
        }
    }
}

/// One logical vehicle class entry in the fleet configuration. `count`
/// identical physical units share all limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleSpec {
    pub class: VehicleClass,
    pub capacity: u32,
    pub count: u32,
    #[serde(default)]
    pub max_distance_m: Option<i64>,
    pub max_time_minutes: u32,
    #[serde(default)]
    pub service_minutes: Option<u32>,
    #[serde(default)]
    pub start_minute: Option<u32>,
    #[serde(default)]
    pub max_stops: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub start_depot: Coordinate,
    /// Origin for per-route re-sequencing; defaults to the start depot.
    #[serde(default)]
    pub tsp_origin: Option<Coordinate>,
}

fn default_enabled() -> bool {
    true
}

impl VehicleSpec {
    pub fn service_seconds(&self) -> i64 {
        i64::from(self.service_minutes.unwrap_or_else(|| self.class.default_service_minutes())) * 60
    }

    pub fn start_minute_of_day(&self) -> u32 {
        self.start_minute.unwrap_or_else(|| self.class.default_start_minute())
    }

    pub fn max_time_seconds(&self) -> i64 {
        i64::from(self.max_time_minutes) * 60
    }

    pub fn tsp_origin_or_depot(&self) -> Coordinate {
        self.tsp_origin.unwrap_or(self.start_depot)
    }
}

/// Ordered list of unique depot coordinates. Depot indices occupy the first
/// `len()` slots of the matrix; customers follow.
#[derive(Debug, Clone, Default)]
pub struct DepotSet {
    coordinates: Vec<Coordinate>,
}

impl DepotSet {
    /// Collect start depots and TSP origins of the enabled fleet, deduplicated
    /// at 6-decimal precision, in first-seen order.
    pub fn from_fleet(fleet: &[VehicleSpec]) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut coordinates = Vec::new();
        for spec in fleet.iter().filter(|s| s.enabled) {
            for coord in [spec.start_depot, spec.tsp_origin_or_depot()] {
                if seen.insert(coord.key()) {
                    coordinates.push(coord);
                }
            }
        }
        Self { coordinates }
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Matrix index of a depot coordinate, if present.
    pub fn index_of(&self, coord: Coordinate) -> Option<usize> {
        let key = coord.key();
        self.coordinates.iter().position(|c| c.key() == key)
    }
}

/// A single vehicle's ordered route through its customers.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    /// Index into the fleet spec list.
    pub vehicle_spec: usize,
    pub vehicle_class: VehicleClass,
    /// Customer ids in visit order (depot excluded at both ends).
    pub customers: Vec<String>,
    /// Travel distance in meters, depot to depot.
    pub total_distance_m: i64,
    /// Travel plus service time in seconds, using traffic-adjusted durations.
    pub total_duration_s: i64,
    pub total_demand: f64,
    pub start_minute: u32,
    pub feasible: bool,
}

impl Route {
    pub fn stops(&self) -> usize {
        self.customers.len()
    }
}

/// Aggregate numbers reported alongside a solution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolutionMetrics {
    pub total_distance_m: i64,
    pub total_duration_s: i64,
    pub total_demand: f64,
    pub vehicles_used: usize,
}

/// Solver output: routes plus customers the solver chose to drop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub dropped: Vec<String>,
    pub metrics: SolutionMetrics,
    /// Arc cost in plain (pre-traffic) meters plus dropping penalties.
    pub fitness: i64,
    /// Set when the greedy fallback produced this solution or degraded matrix
    /// cells were in play.
    pub degraded: bool,
}

impl Solution {
    pub fn recompute_metrics(&mut self) {
        let mut metrics = SolutionMetrics::default();
        for route in &self.routes {
            metrics.total_distance_m += route.total_distance_m;
            metrics.total_duration_s += route.total_duration_s;
            metrics.total_demand += route.total_demand;
        }
        metrics.vehicles_used = self.routes.iter().filter(|r| !r.customers.is_empty()).count();
        self.metrics = metrics;
    }
}
