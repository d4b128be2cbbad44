//! Per-route TSP post-optimization.
//!
//! After the CVRP solver commits customers to vehicles, each route can be
//! re-sequenced against its vehicle's TSP origin, which may differ from the
//! operational depot. The new order is kept only when it is strictly shorter;
//! reported metrics are always recomputed from the real matrix afterwards.

use std::collections::HashMap;

use tracing::debug;

use crate::matrix::Matrix;
use crate::model::{Customer, DepotSet, Solution, VehicleSpec};

/// Cap on 2-opt sweeps per route; nearest-neighbor order stands when the
/// improvement loop runs out of budget.
const MAX_TWO_OPT_PASSES: usize = 50;

/// Re-sequence every eligible route in `solution`.
///
/// A route is eligible when its vehicle's TSP origin differs from its start
/// depot, or unconditionally when `reconfigure_all` is set.
pub fn post_optimize(
    solution: &mut Solution,
    matrix: &Matrix,
    depots: &DepotSet,
    fleet: &[VehicleSpec],
    customers: &[Customer],
    reconfigure_all: bool,
) {
    let node_of: HashMap<&str, usize> = customers
        .iter()
        .filter_map(|c| {
            matrix
                .index_of(c.coordinate)
                .map(|node| (c.id.as_str(), node))
        })
        .collect();

    for route in &mut solution.routes {
        let Some(spec) = fleet.get(route.vehicle_spec) else {
            continue;
        };
        let origin = spec.tsp_origin_or_depot();
        if !reconfigure_all && origin.key() == spec.start_depot.key() {
            continue;
        }
        let (Some(origin_node), Some(depot_node)) =
            (depots.index_of(origin), depots.index_of(spec.start_depot))
        else {
            continue;
        };

        let nodes: Option<Vec<usize>> = route
            .customers
            .iter()
            .map(|id| node_of.get(id.as_str()).copied())
            .collect();
        let Some(nodes) = nodes else { continue };
        if nodes.len() < 2 {
            continue;
        }

        let current_cost = closed_tour_duration(matrix, origin_node, &nodes);
        let order = solve_tsp(matrix, origin_node, &nodes);
        let reordered: Vec<usize> = order.iter().map(|&i| nodes[i]).collect();
        let new_cost = closed_tour_duration(matrix, origin_node, &reordered);

        if new_cost < current_cost {
            debug!(
                vehicle_spec = route.vehicle_spec,
                before = current_cost,
                after = new_cost,
                "route re-sequenced from TSP origin"
            );
            let reordered_ids: Vec<String> = order
                .iter()
                .map(|&i| route.customers[i].clone())
                .collect();
            route.customers = reordered_ids;
        }

        // Authoritative metrics always come from the real matrix against the
        // operational depot, whatever origin the re-sequencing used.
        let nodes_now: Vec<usize> = route
            .customers
            .iter()
            .filter_map(|id| node_of.get(id.as_str()).copied())
            .collect();
        let (distance_m, travel_s) = depot_tour(matrix, depot_node, &nodes_now);
        route.total_distance_m = distance_m;
        route.total_duration_s = travel_s + spec.service_seconds() * nodes_now.len() as i64;
    }

    solution.recompute_metrics();
}

/// Nearest-neighbor construction plus bounded 2-opt over the closed tour.
/// Returns a permutation of positions into `nodes`.
fn solve_tsp(matrix: &Matrix, origin: usize, nodes: &[usize]) -> Vec<usize> {
    // Nearest neighbor from the origin.
    let mut remaining: Vec<usize> = (0..nodes.len()).collect();
    let mut tour = Vec::with_capacity(nodes.len());
    let mut current = origin;
    while !remaining.is_empty() {
        let (slot, _) = remaining
            .iter()
            .enumerate()
            .map(|(slot, &pos)| (slot, matrix.duration(current, nodes[pos])))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .unwrap_or((0, 0));
        let pos = remaining.remove(slot);
        current = nodes[pos];
        tour.push(pos);
    }

    // 2-opt with the origin pinned at both ends.
    for _ in 0..MAX_TWO_OPT_PASSES {
        let mut improved = false;
        let n = tour.len();
        for i in 0..n.saturating_sub(1) {
            for j in (i + 1)..n {
                let prev = if i == 0 { origin } else { nodes[tour[i - 1]] };
                let next = if j + 1 == n { origin } else { nodes[tour[j + 1]] };
                let before = matrix.duration(prev, nodes[tour[i]])
                    + matrix.duration(nodes[tour[j]], next);
                let after = matrix.duration(prev, nodes[tour[j]])
                    + matrix.duration(nodes[tour[i]], next);
                if after < before {
                    tour[i..=j].reverse();
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }

    tour
}

fn closed_tour_duration(matrix: &Matrix, origin: usize, nodes: &[usize]) -> i64 {
    if nodes.is_empty() {
        return 0;
    }
    let mut total = 0i64;
    let mut prev = origin;
    for &node in nodes {
        total += matrix.duration(prev, node);
        prev = node;
    }
    total + matrix.duration(prev, origin)
}

fn depot_tour(matrix: &Matrix, depot: usize, nodes: &[usize]) -> (i64, i64) {
    if nodes.is_empty() {
        return (0, 0);
    }
    let mut distance = 0i64;
    let mut duration = 0i64;
    let mut prev = depot;
    for &node in nodes {
        distance += matrix.distance(prev, node);
        duration += matrix.duration(prev, node);
        prev = node;
    }
    distance += matrix.distance(prev, depot);
    duration += matrix.duration(prev, depot);
    (distance, duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    fn line_matrix() -> Matrix {
        // Five points on a line; index = position. Durations proportional to
        // separation, so the optimal order from node 0 is monotone.
        let coords: Vec<Coordinate> = (0..5)
            .map(|i| Coordinate::new(42.70 + f64::from(i) * 0.01, 23.32).unwrap())
            .collect();
        let n = coords.len();
        let mut d = vec![vec![0i32; n]; n];
        let mut t = vec![vec![0i32; n]; n];
        for i in 0..n {
            for j in 0..n {
                let gap = (i as i32 - j as i32).abs();
                d[i][j] = gap * 1000;
                t[i][j] = gap * 100;
            }
        }
        Matrix::new(coords, d, t, 0)
    }

    #[test]
    fn tsp_orders_line_monotonically() {
        let matrix = line_matrix();
        let nodes = [3, 1, 4, 2];
        let order = solve_tsp(&matrix, 0, &nodes);
        let visited: Vec<usize> = order.iter().map(|&i| nodes[i]).collect();
        assert_eq!(visited, vec![1, 2, 3, 4]);
    }

    #[test]
    fn scrambled_order_costs_more() {
        let matrix = line_matrix();
        let good = closed_tour_duration(&matrix, 0, &[1, 2, 3, 4]);
        let bad = closed_tour_duration(&matrix, 0, &[3, 1, 4, 2]);
        assert!(good < bad);
    }

    #[test]
    fn post_optimize_reorders_and_recomputes_metrics() {
        use crate::model::{Route, VehicleClass, VehicleSpec};

        // Depot and TSP origin coincide with matrix nodes 0 and 1; customers
        // at nodes 2..=4 arrive scrambled.
        let matrix = line_matrix();
        let coords = matrix.coordinates().to_vec();

        let spec = VehicleSpec {
            class: VehicleClass::Internal,
            capacity: 100,
            count: 1,
            max_distance_m: None,
            max_time_minutes: 480,
            service_minutes: Some(0),
            start_minute: None,
            max_stops: None,
            enabled: true,
            start_depot: coords[0],
            tsp_origin: Some(coords[1]),
        };
        let fleet = vec![spec];
        let depots = DepotSet::from_fleet(&fleet);

        let customers: Vec<Customer> = [2usize, 3, 4]
            .iter()
            .map(|&node| Customer {
                id: format!("c{}", node),
                name: format!("Customer {}", node),
                coordinate: coords[node],
                volume: 10.0,
            })
            .collect();

        let mut solution = Solution {
            routes: vec![Route {
                vehicle_spec: 0,
                vehicle_class: VehicleClass::Internal,
                customers: vec!["c4".into(), "c2".into(), "c3".into()],
                total_distance_m: 0,
                total_duration_s: 0,
                total_demand: 30.0,
                start_minute: 480,
                feasible: true,
            }],
            ..Solution::default()
        };

        post_optimize(&mut solution, &matrix, &depots, &fleet, &customers, false);

        // Monotone order from the origin, metrics rebuilt from the matrix:
        // depot(0) -> 2 -> 3 -> 4 -> depot(0) is 8 km, 800 seconds.
        assert_eq!(solution.routes[0].customers, vec!["c2", "c3", "c4"]);
        assert_eq!(solution.routes[0].total_distance_m, 8000);
        assert_eq!(solution.routes[0].total_duration_s, 800);
        assert_eq!(solution.metrics.total_distance_m, 8000);
    }
}
