//! Route and candidate evaluation shared by every backend.
//!
//! A candidate is one route (a customer-index sequence) per vehicle unit plus
//! a dropped set. Evaluation recomputes everything from the matrix each time;
//! routes are short enough that incremental bookkeeping is not worth the
//! invariant risk.

use crate::solver::cost::{ArcCostSource, DropPolicy};
use crate::solver::ProblemInstance;

/// One solver candidate. Route `v` belongs to vehicle unit `v`; entries are
/// indices into the instance's customer list.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub routes: Vec<Vec<usize>>,
    pub dropped: Vec<usize>,
    /// Stable identity for deterministic tie-breaking across workers.
    pub id: usize,
}

impl Candidate {
    pub fn empty(instance: &ProblemInstance<'_>, id: usize) -> Self {
        Self {
            routes: vec![Vec::new(); instance.vehicles.len()],
            dropped: (0..instance.customers.len()).collect(),
            id,
        }
    }

    pub fn served(&self) -> usize {
        self.routes.iter().map(Vec::len).sum()
    }

    pub fn used_vehicles(&self) -> usize {
        self.routes.iter().filter(|r| !r.is_empty()).count()
    }
}

/// Physical route totals measured against the (traffic-adjusted) matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEval {
    pub distance_m: i64,
    /// Travel only; service time reported separately.
    pub travel_s: i64,
    pub service_s: i64,
    pub demand: f64,
    pub feasible: bool,
}

impl RouteEval {
    pub fn duration_s(&self) -> i64 {
        self.travel_s + self.service_s
    }
}

/// Evaluate a vehicle's route depot-to-depot.
pub fn eval_route(instance: &ProblemInstance<'_>, vehicle: usize, customers: &[usize]) -> RouteEval {
    let unit = &instance.vehicles[vehicle];
    if customers.is_empty() {
        return RouteEval {
            distance_m: 0,
            travel_s: 0,
            service_s: 0,
            demand: 0.0,
            feasible: true,
        };
    }

    let mut distance_m = 0i64;
    let mut travel_s = 0i64;
    let mut demand = 0.0f64;
    let mut prev = unit.start_node;
    for &ci in customers {
        let node = instance.customers[ci].node;
        distance_m += instance.matrix.distance(prev, node);
        travel_s += instance.matrix.duration(prev, node);
        demand += instance.customers[ci].demand;
        prev = node;
    }
    distance_m += instance.matrix.distance(prev, unit.end_node);
    travel_s += instance.matrix.duration(prev, unit.end_node);

    let service_s = unit.service_time_s * customers.len() as i64;
    let feasible = demand <= unit.capacity + 1e-9
        && unit.max_distance_m.is_none_or(|cap| distance_m <= cap)
        && unit.max_stops.is_none_or(|cap| customers.len() <= cap)
        && travel_s + service_s <= unit.max_time_s;

    RouteEval {
        distance_m,
        travel_s,
        service_s,
        demand,
        feasible,
    }
}

/// Profile arc cost of a route, depot out and home again.
pub fn route_cost<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    vehicle: usize,
    customers: &[usize],
) -> i64 {
    let unit = &instance.vehicles[vehicle];
    if customers.is_empty() {
        return 0;
    }
    let mut total = 0i64;
    let mut prev = unit.start_node;
    for &ci in customers {
        let node = instance.customers[ci].node;
        total += costs.arc_cost(unit.class, prev, node);
        prev = node;
    }
    total + costs.arc_cost(unit.class, prev, unit.end_node)
}

/// Search objective: profile costs plus dropping penalties.
pub fn candidate_cost<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    candidate: &Candidate,
) -> i64 {
    let routed: i64 = candidate
        .routes
        .iter()
        .enumerate()
        .map(|(v, route)| route_cost(instance, costs, v, route))
        .sum();
    let dropped: i64 = candidate
        .dropped
        .iter()
        .map(|&ci| drop.cost(instance.customers[ci].demand))
        .sum();
    routed + dropped
}

/// Reported fitness: plain distance units plus dropping penalties, with
/// profile penalties excluded.
pub fn candidate_fitness(
    instance: &ProblemInstance<'_>,
    drop: &DropPolicy,
    candidate: &Candidate,
) -> i64 {
    let distance: i64 = candidate
        .routes
        .iter()
        .enumerate()
        .map(|(v, route)| eval_route(instance, v, route).distance_m)
        .sum();
    let dropped: i64 = candidate
        .dropped
        .iter()
        .map(|&ci| drop.cost(instance.customers[ci].demand))
        .sum();
    distance + dropped
}

pub fn served_demand(instance: &ProblemInstance<'_>, candidate: &Candidate) -> f64 {
    candidate
        .routes
        .iter()
        .flatten()
        .map(|&ci| instance.customers[ci].demand)
        .sum()
}

/// All routes individually feasible?
pub fn candidate_feasible(instance: &ProblemInstance<'_>, candidate: &Candidate) -> bool {
    candidate
        .routes
        .iter()
        .enumerate()
        .all(|(v, route)| eval_route(instance, v, route).feasible)
}

/// Evaluate `customer` spliced into `route` at `pos`; `None` when any
/// dimension ceiling would be crossed.
pub fn try_insert(
    instance: &ProblemInstance<'_>,
    vehicle: usize,
    route: &[usize],
    pos: usize,
    customer: usize,
) -> Option<RouteEval> {
    let mut extended = Vec::with_capacity(route.len() + 1);
    extended.extend_from_slice(&route[..pos]);
    extended.push(customer);
    extended.extend_from_slice(&route[pos..]);
    let eval = eval_route(instance, vehicle, &extended);
    eval.feasible.then_some(eval)
}

/// Arc-cost delta of inserting `customer` into `route` at `pos`, without
/// feasibility checks.
pub fn insertion_delta<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    vehicle: usize,
    route: &[usize],
    pos: usize,
    customer: usize,
) -> i64 {
    let unit = &instance.vehicles[vehicle];
    let node = instance.customers[customer].node;
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
    costs.arc_cost(unit.class, prev, node) + costs.arc_cost(unit.class, node, next)
        - costs.arc_cost(unit.class, prev, next)
}
