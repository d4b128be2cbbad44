//! Arc costs and dropping penalties.
//!
//! The center-zone business rule is encoded entirely in arc costs: the center
//! class is discounted into the zone and penalized out of it, every other
//! class is penalized into the zone. Penalties are large but finite, so an
//! otherwise-unservable customer can still be picked up by the "wrong" class.

use crate::config::LocationsConfig;
use crate::geo::within_disk;
use crate::matrix::Matrix;
use crate::model::VehicleClass;

/// Uniform view of arc costs used by construction and search. Backend A
/// dispatches on vehicle class per call; backend B answers from precomputed
/// per-profile tables.
pub trait ArcCostSource: Sync {
    fn arc_cost(&self, class: VehicleClass, from_node: usize, to_node: usize) -> i64;
}

/// Class-dispatching cost model over the raw distance matrix.
#[derive(Debug, Clone)]
pub struct CostModel {
    /// Per-node membership in the center zone; depot nodes are always false.
    in_center: Vec<bool>,
    /// Nodes below this index are depots; arcs into them cost plain distance.
    depot_count: usize,
    enabled: bool,
    discount_in_zone: f64,
    /// Penalty for a center vehicle leaving the zone.
    exit_penalty_m: i64,
    /// Penalty for a non-center vehicle entering the zone, per class kind.
    entry_penalty_external_m: i64,
    entry_penalty_internal_m: i64,
    distances_m: Vec<Vec<i32>>,
}

impl CostModel {
    pub fn new(matrix: &Matrix, locations: &LocationsConfig, depot_count: usize) -> Self {
        let in_center = matrix
            .coordinates()
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                i >= depot_count
                    && within_disk(c, locations.center_location, locations.center_zone_radius_km)
            })
            .collect();

        let base = locations.center_penalty_m;
        Self {
            in_center,
            depot_count,
            enabled: locations.enable_center_zone_restrictions,
            discount_in_zone: locations.center_discount_in_zone,
            exit_penalty_m: base,
            entry_penalty_external_m: (base as f64
                * locations.external_bus_center_penalty_multiplier)
                .round() as i64,
            entry_penalty_internal_m: (base as f64
                * locations.internal_bus_center_penalty_multiplier)
                .round() as i64,
            distances_m: matrix.distances_m.clone(),
        }
    }

    /// Cost model with zone rules disabled; arcs cost plain distance.
    pub fn plain(matrix: &Matrix) -> Self {
        Self {
            in_center: vec![false; matrix.len()],
            depot_count: matrix.len(),
            enabled: false,
            discount_in_zone: 1.0,
            exit_penalty_m: 0,
            entry_penalty_external_m: 0,
            entry_penalty_internal_m: 0,
            distances_m: matrix.distances_m.clone(),
        }
    }

    pub fn node_in_center(&self, node: usize) -> bool {
        self.in_center.get(node).copied().unwrap_or(false)
    }

    fn entry_penalty(&self, class: VehicleClass) -> i64 {
        match class {
            VehicleClass::External => self.entry_penalty_external_m,
            _ => self.entry_penalty_internal_m,
        }
    }
}

impl ArcCostSource for CostModel {
    fn arc_cost(&self, class: VehicleClass, from_node: usize, to_node: usize) -> i64 {
        let distance = i64::from(self.distances_m[from_node][to_node]);
        // Zone rules attach to the arc's head: what matters is which customer
        // the vehicle is being sent to. Arcs into depots stay plain.
        if !self.enabled || to_node < self.depot_count {
            return distance;
        }
        let head_in_center = self.node_in_center(to_node);
        match (class, head_in_center) {
            (VehicleClass::Center, true) => {
                (distance as f64 * self.discount_in_zone).round() as i64
            }
            (VehicleClass::Center, false) => distance + self.exit_penalty_m,
            (_, true) => distance + self.entry_penalty(class),
            (_, false) => distance,
        }
    }
}

/// Backend B's two precomputed profiles: one table for the center class, one
/// shared by everything else.
#[derive(Debug, Clone)]
pub struct ProfileTables {
    center: Vec<Vec<i64>>,
    default: Vec<Vec<i64>>,
}

impl ProfileTables {
    /// Derive both tables from a dispatching model. The input matrix must
    /// already be traffic-adjusted; profile costs inherit that adjustment's
    /// distance basis unchanged.
    pub fn from_model(model: &CostModel) -> Self {
        let n = model.distances_m.len();
        let build = |class: VehicleClass| -> Vec<Vec<i64>> {
            (0..n)
                .map(|from| (0..n).map(|to| model.arc_cost(class, from, to)).collect())
                .collect()
        };
        Self {
            center: build(VehicleClass::Center),
            default: build(VehicleClass::Internal),
        }
    }
}

impl ArcCostSource for ProfileTables {
    fn arc_cost(&self, class: VehicleClass, from_node: usize, to_node: usize) -> i64 {
        match class {
            VehicleClass::Center => self.center[from_node][to_node],
            _ => self.default[from_node][to_node],
        }
    }
}

/// Dropping-cost policy. Simple mode charges a flat penalty; prize mode makes
/// bigger customers more expensive to drop.
#[derive(Debug, Clone)]
pub struct DropPolicy {
    pub allowed: bool,
    pub base_penalty: i64,
    pub demand_coefficient: i64,
}

/// Charged instead of the drop penalty when skipping is disabled; high enough
/// that any routed alternative wins.
const FORBIDDEN_DROP_PENALTY: i64 = 50_000_000;

impl DropPolicy {
    pub fn cost(&self, demand: f64) -> i64 {
        if !self.allowed {
            return FORBIDDEN_DROP_PENALTY;
        }
        self.base_penalty + demand.round() as i64 * self.demand_coefficient
    }
}
