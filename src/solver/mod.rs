//! CVRP core solver.
//!
//! Two interchangeable backends share one contract: take the serviceable
//! customers, the expanded fleet and the traffic-adjusted matrix, return a
//! set of capacity-, distance-, stop- and time-feasible routes, optionally
//! dropping customers at a known penalty. If a backend produces nothing
//! usable, a greedy construction steps in and the solution is marked
//! degraded.

pub mod backend_a;
pub mod backend_b;
pub mod construct;
pub mod cost;
pub mod route;
pub mod search;

use std::cmp::Ordering;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{FirstSolutionStrategy, Metaheuristic, PlannerConfig, SolverType};
use crate::error::PlannerError;
use crate::matrix::Matrix;
use crate::model::{Customer, DepotSet, Route, Solution, VehicleClass, VehicleSpec};
use crate::solver::cost::{CostModel, DropPolicy};
use crate::solver::route::{
    candidate_feasible, candidate_fitness, eval_route, served_demand, try_insert, Candidate,
};

/// One physical vehicle, expanded from a fleet spec entry.
#[derive(Debug, Clone)]
pub struct VehicleUnit {
    pub spec_index: usize,
    pub class: VehicleClass,
    pub capacity: f64,
    pub max_distance_m: Option<i64>,
    pub max_stops: Option<usize>,
    pub max_time_s: i64,
    pub service_time_s: i64,
    pub start_minute: u32,
    pub start_node: usize,
    pub end_node: usize,
    pub tsp_origin_node: usize,
}

/// A serviceable customer bound to its matrix node.
#[derive(Debug, Clone)]
pub struct CustomerNode {
    pub id: String,
    pub demand: f64,
    pub node: usize,
}

/// Everything a backend needs, borrowed read-only for the run.
#[derive(Debug)]
pub struct ProblemInstance<'a> {
    pub matrix: &'a Matrix,
    pub customers: Vec<CustomerNode>,
    pub vehicles: Vec<VehicleUnit>,
}

impl<'a> ProblemInstance<'a> {
    /// Bind customers and the enabled fleet to matrix nodes. Depot indices
    /// come from the depot set; customer nodes follow the depot block in the
    /// matrix's coordinate order.
    pub fn build(
        matrix: &'a Matrix,
        depots: &DepotSet,
        fleet: &[VehicleSpec],
        serviceable: &[Customer],
    ) -> Result<Self, PlannerError> {
        let mut customers = Vec::with_capacity(serviceable.len());
        for customer in serviceable {
            let node = matrix.index_of(customer.coordinate).ok_or_else(|| {
                PlannerError::InvalidInput(format!(
                    "customer {} missing from the matrix",
                    customer.id
                ))
            })?;
            customers.push(CustomerNode {
                id: customer.id.clone(),
                demand: customer.volume,
                node,
            });
        }

        let mut vehicles = Vec::new();
        for (spec_index, spec) in fleet.iter().enumerate() {
            if !spec.enabled {
                continue;
            }
            let start_node = depots.index_of(spec.start_depot).ok_or_else(|| {
                PlannerError::InvalidInput(format!("vehicle {} depot missing", spec_index))
            })?;
            let tsp_origin_node =
                depots.index_of(spec.tsp_origin_or_depot()).ok_or_else(|| {
                    PlannerError::InvalidInput(format!(
                        "vehicle {} TSP origin missing",
                        spec_index
                    ))
                })?;
            for _ in 0..spec.count {
                vehicles.push(VehicleUnit {
                    spec_index,
                    class: spec.class,
                    capacity: f64::from(spec.capacity),
                    max_distance_m: spec.max_distance_m,
                    max_stops: spec.max_stops,
                    max_time_s: spec.max_time_seconds(),
                    service_time_s: spec.service_seconds(),
                    start_minute: spec.start_minute_of_day(),
                    start_node,
                    end_node: start_node,
                    tsp_origin_node,
                });
            }
        }

        Ok(Self {
            matrix,
            customers,
            vehicles,
        })
    }
}

/// Search configuration distilled from the planner config.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub solver_type: SolverType,
    pub time_limit: Duration,
    pub drop: DropPolicy,
    pub parallel: bool,
    pub workers: usize,
    pub first_solution_strategies: Vec<FirstSolutionStrategy>,
    pub metaheuristics: Vec<Metaheuristic>,
    pub lambda: f64,
    pub lns_time_limit: Duration,
    pub lns_num_nodes: usize,
    pub lns_num_arcs: usize,
}

impl SolverSettings {
    pub fn from_config(config: &PlannerConfig) -> Self {
        let cvrp = &config.cvrp;
        Self {
            solver_type: cvrp.solver_type,
            time_limit: Duration::from_secs(cvrp.time_limit_seconds),
            drop: DropPolicy {
                allowed: cvrp.allow_customer_skipping,
                base_penalty: cvrp.distance_penalty_disjunction,
                demand_coefficient: cvrp.prize_demand_coefficient,
            },
            parallel: cvrp.enable_parallel_solving,
            workers: config.solver_workers(),
            first_solution_strategies: cvrp.first_solution_strategies.clone(),
            metaheuristics: cvrp.metaheuristics.clone(),
            lambda: cvrp.search_lambda_coefficient,
            lns_time_limit: Duration::from_secs(cvrp.lns_time_limit_seconds),
            lns_num_nodes: cvrp.lns_num_nodes,
            lns_num_arcs: cvrp.lns_num_arcs,
        }
    }
}

/// Run the configured backend, with the greedy fallback behind it.
pub fn solve(
    instance: &ProblemInstance<'_>,
    costs: &CostModel,
    settings: &SolverSettings,
) -> Solution {
    if instance.customers.is_empty() || instance.vehicles.is_empty() {
        // Infeasible problem is not an error: empty solution, everything
        // already sits in the warehouse set.
        return Solution::default();
    }

    let best = match settings.solver_type {
        SolverType::BackendA => backend_a::solve(instance, costs, settings),
        SolverType::BackendB => backend_b::solve(instance, costs, settings),
    };

    match best {
        Some(candidate) if candidate_feasible(instance, &candidate) => {
            extract(instance, &settings.drop, &candidate, false)
        }
        other => {
            if other.is_some() {
                warn!("backend produced an infeasible candidate; using greedy fallback");
            } else {
                warn!("backend produced no candidate; using greedy fallback");
            }
            let fallback = greedy_candidate(instance, usize::MAX);
            extract(instance, &settings.drop, &fallback, true)
        }
    }
}

/// Deterministic winner among worker candidates: feasible first, then lowest
/// fitness, largest served demand, fewest vehicles, lowest id.
pub fn select_winner(
    instance: &ProblemInstance<'_>,
    drop: &DropPolicy,
    candidates: Vec<Candidate>,
) -> Option<Candidate> {
    let mut feasible: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| candidate_feasible(instance, c))
        .collect();
    if feasible.is_empty() {
        return None;
    }
    feasible.sort_by(|a, b| {
        candidate_fitness(instance, drop, a)
            .cmp(&candidate_fitness(instance, drop, b))
            .then_with(|| {
                served_demand(instance, b)
                    .partial_cmp(&served_demand(instance, a))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.used_vehicles().cmp(&b.used_vehicles()))
            .then_with(|| a.id.cmp(&b.id))
    });
    feasible.into_iter().next()
}

/// Best-effort construction when the backends fail: customers by demand
/// descending, each placed at the cheapest feasible position of the first
/// vehicle that admits it.
pub fn greedy_candidate(instance: &ProblemInstance<'_>, id: usize) -> Candidate {
    let mut order: Vec<usize> = (0..instance.customers.len()).collect();
    order.sort_by(|&a, &b| {
        instance.customers[b]
            .demand
            .partial_cmp(&instance.customers[a].demand)
            .unwrap_or(Ordering::Equal)
            .then_with(|| instance.customers[a].id.cmp(&instance.customers[b].id))
    });

    let mut candidate = Candidate {
        routes: vec![Vec::new(); instance.vehicles.len()],
        dropped: Vec::new(),
        id,
    };

    for ci in order {
        let mut placed = false;
        for v in 0..instance.vehicles.len() {
            let route = &candidate.routes[v];
            let mut best: Option<(usize, i64)> = None;
            for pos in 0..=route.len() {
                if try_insert(instance, v, route, pos, ci).is_none() {
                    continue;
                }
                let node = instance.customers[ci].node;
                let unit = &instance.vehicles[v];
                let prev = if pos == 0 {
                    unit.start_node
                } else {
                    instance.customers[route[pos - 1]].node
                };
                let next = if pos == route.len() {
                    unit.end_node
                } else {
                    instance.customers[route[pos]].node
                };
                let delta = instance.matrix.distance(prev, node)
                    + instance.matrix.distance(node, next)
                    - instance.matrix.distance(prev, next);
                if best.is_none_or(|(_, cost)| delta < cost) {
                    best = Some((pos, delta));
                }
            }
            if let Some((pos, _)) = best {
                candidate.routes[v].insert(pos, ci);
                placed = true;
                break;
            }
        }
        if !placed {
            candidate.dropped.push(ci);
        }
    }

    candidate
}

/// Turn a candidate into the reported solution. Totals are recomputed from
/// the adjusted matrix plus service times; profile penalties never leak into
/// reported distances.
pub fn extract(
    instance: &ProblemInstance<'_>,
    drop: &DropPolicy,
    candidate: &Candidate,
    degraded: bool,
) -> Solution {
    let mut solution = Solution {
        fitness: candidate_fitness(instance, drop, candidate),
        degraded,
        ..Solution::default()
    };

    for (v, route) in candidate.routes.iter().enumerate() {
        if route.is_empty() {
            continue;
        }
        let unit = &instance.vehicles[v];
        let eval = eval_route(instance, v, route);
        solution.routes.push(Route {
            vehicle_spec: unit.spec_index,
            vehicle_class: unit.class,
            customers: route
                .iter()
                .map(|&ci| instance.customers[ci].id.clone())
                .collect(),
            total_distance_m: eval.distance_m,
            total_duration_s: eval.duration_s(),
            total_demand: eval.demand,
            start_minute: unit.start_minute,
            feasible: eval.feasible,
        });
    }

    solution.dropped = candidate
        .dropped
        .iter()
        .map(|&ci| instance.customers[ci].id.clone())
        .collect();
    solution.recompute_metrics();

    info!(
        routes = solution.routes.len(),
        dropped = solution.dropped.len(),
        fitness = solution.fitness,
        degraded = solution.degraded,
        "solution extracted"
    );
    solution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    /// Node 0 depot, nodes 1..=3 customers laid out on a line 1 km apart.
    fn line_matrix() -> Matrix {
        let coords: Vec<Coordinate> = (0..4)
            .map(|i| Coordinate::new(42.70 + f64::from(i) * 0.009, 23.32).unwrap())
            .collect();
        let n = coords.len();
        let mut d = vec![vec![0i32; n]; n];
        let mut t = vec![vec![0i32; n]; n];
        for i in 0..n {
            for j in 0..n {
                let gap = (i as i32 - j as i32).abs();
                d[i][j] = gap * 1000;
                t[i][j] = gap * 90;
            }
        }
        Matrix::new(coords, d, t, 0)
    }

    fn unit(capacity: f64, max_stops: Option<usize>) -> VehicleUnit {
        VehicleUnit {
            spec_index: 0,
            class: VehicleClass::Internal,
            capacity,
            max_distance_m: None,
            max_stops,
            max_time_s: 8 * 3600,
            service_time_s: 0,
            start_minute: 480,
            start_node: 0,
            end_node: 0,
            tsp_origin_node: 0,
        }
    }

    fn instance(matrix: &Matrix, vehicles: Vec<VehicleUnit>) -> ProblemInstance<'_> {
        ProblemInstance {
            matrix,
            customers: (1..4)
                .map(|node| CustomerNode {
                    id: format!("c{}", node),
                    demand: 10.0,
                    node,
                })
                .collect(),
            vehicles,
        }
    }

    fn drop_policy() -> DropPolicy {
        DropPolicy {
            allowed: true,
            base_penalty: 100_000,
            demand_coefficient: 0,
        }
    }

    #[test]
    fn winner_is_lowest_fitness_then_lowest_id() {
        let matrix = line_matrix();
        let inst = instance(&matrix, vec![unit(100.0, None), unit(100.0, None)]);

        let all_on_one = Candidate {
            routes: vec![vec![0, 1, 2], vec![]],
            dropped: vec![],
            id: 1,
        };
        let with_drop = Candidate {
            routes: vec![vec![0, 1], vec![]],
            dropped: vec![2],
            id: 0,
        };
        let twin = Candidate {
            routes: vec![vec![0, 1, 2], vec![]],
            dropped: vec![],
            id: 7,
        };

        let winner = select_winner(
            &inst,
            &drop_policy(),
            vec![with_drop, twin.clone(), all_on_one.clone()],
        )
        .unwrap();
        // Dropping pays 100k; the full route is cheaper. Equal-fitness twins
        // resolve to the lower id.
        assert_eq!(winner.id, all_on_one.id);
        assert_ne!(winner.id, twin.id);
    }

    #[test]
    fn infeasible_candidates_are_filtered() {
        let matrix = line_matrix();
        let inst = instance(&matrix, vec![unit(15.0, None)]);

        let overloaded = Candidate {
            routes: vec![vec![0, 1, 2]],
            dropped: vec![],
            id: 0,
        };
        assert!(select_winner(&inst, &drop_policy(), vec![overloaded]).is_none());
    }

    #[test]
    fn greedy_respects_capacity_and_stop_caps() {
        let matrix = line_matrix();
        let inst = instance(&matrix, vec![unit(20.0, Some(2)), unit(20.0, Some(2))]);

        let candidate = greedy_candidate(&inst, 0);
        assert!(candidate_feasible(&inst, &candidate));
        assert_eq!(candidate.served() + candidate.dropped.len(), 3);
        for route in &candidate.routes {
            assert!(route.len() <= 2);
        }
        // Three customers of 10 against two 20-capacity, 2-stop vehicles: all
        // three fit.
        assert!(candidate.dropped.is_empty());
    }

    #[test]
    fn greedy_is_deterministic() {
        let matrix = line_matrix();
        let inst = instance(&matrix, vec![unit(20.0, Some(2)), unit(20.0, Some(2))]);
        let a = greedy_candidate(&inst, 0);
        let b = greedy_candidate(&inst, 0);
        assert_eq!(a, b);
    }
}
