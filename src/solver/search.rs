//! Local-search operators and metaheuristics.
//!
//! All operators are first-improvement and deterministic for a fixed
//! iteration order; randomized metaheuristics draw from a seeded generator so
//! every worker is reproducible.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Metaheuristic;
use crate::solver::cost::{ArcCostSource, DropPolicy};
use crate::solver::route::{candidate_cost, eval_route, route_cost, try_insert, Candidate};
use crate::solver::{ProblemInstance, SolverSettings};

/// Inner-loop deadline: the neighborhood budget, clipped to the global one.
pub(crate) fn inner_deadline(global: Instant, budget: std::time::Duration) -> Instant {
    if budget.is_zero() {
        global
    } else {
        (Instant::now() + budget).min(global)
    }
}

/// Arc costs augmented with guided-local-search penalties.
struct Augmented<'a, C: ArcCostSource> {
    base: &'a C,
    penalties: &'a [Vec<i32>],
    weight: i64,
}

impl<C: ArcCostSource> ArcCostSource for Augmented<'_, C> {
    fn arc_cost(
        &self,
        class: crate::model::VehicleClass,
        from_node: usize,
        to_node: usize,
    ) -> i64 {
        self.base.arc_cost(class, from_node, to_node)
            + self.weight * i64::from(self.penalties[from_node][to_node])
    }
}

/// Run improvement operators to a local optimum or the deadline.
pub fn local_search<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    candidate: &mut Candidate,
    deadline: Instant,
) {
    loop {
        if Instant::now() >= deadline {
            return;
        }
        let improved = relocate_improve(instance, costs, candidate)
            || swap_improve(instance, costs, candidate)
            || two_opt_improve(instance, costs, candidate)
            || or_opt_improve(instance, costs, candidate)
            || reinsert_improve(instance, costs, drop, candidate)
            || drop_improve(instance, costs, drop, candidate);
        if !improved {
            return;
        }
    }
}

/// Move one customer to the cheapest improving feasible position anywhere.
fn relocate_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
) -> bool {
    let vehicles = instance.vehicles.len();
    for v1 in 0..vehicles {
        for idx in 0..candidate.routes[v1].len() {
            let ci = candidate.routes[v1][idx];
            let mut shrunk = candidate.routes[v1].clone();
            shrunk.remove(idx);
            let old_v1 = route_cost(instance, costs, v1, &candidate.routes[v1]);
            let new_v1 = route_cost(instance, costs, v1, &shrunk);
            if !eval_route(instance, v1, &shrunk).feasible {
                continue;
            }

            for v2 in 0..vehicles {
                let target: &[usize] = if v2 == v1 {
                    &shrunk
                } else {
                    &candidate.routes[v2]
                };
                let old_v2 = if v2 == v1 {
                    0
                } else {
                    route_cost(instance, costs, v2, target)
                };
                for pos in 0..=target.len() {
                    if v2 == v1 && (pos == idx) {
                        continue;
                    }
                    if try_insert(instance, v2, target, pos, ci).is_none() {
                        continue;
                    }
                    let mut grown = Vec::with_capacity(target.len() + 1);
                    grown.extend_from_slice(&target[..pos]);
                    grown.push(ci);
                    grown.extend_from_slice(&target[pos..]);
                    let new_v2 = route_cost(instance, costs, v2, &grown);

                    let delta = if v2 == v1 {
                        new_v2 - old_v1
                    } else {
                        (new_v1 - old_v1) + (new_v2 - old_v2)
                    };
                    if delta < 0 {
                        if v2 == v1 {
                            candidate.routes[v1] = grown;
                        } else {
                            candidate.routes[v1] = shrunk;
                            candidate.routes[v2] = grown;
                        }
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Exchange two customers between two different routes.
fn swap_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
) -> bool {
    let vehicles = instance.vehicles.len();
    for v1 in 0..vehicles {
        for v2 in (v1 + 1)..vehicles {
            for i in 0..candidate.routes[v1].len() {
                for j in 0..candidate.routes[v2].len() {
                    let mut r1 = candidate.routes[v1].clone();
                    let mut r2 = candidate.routes[v2].clone();
                    std::mem::swap(&mut r1[i], &mut r2[j]);

                    if !eval_route(instance, v1, &r1).feasible
                        || !eval_route(instance, v2, &r2).feasible
                    {
                        continue;
                    }
                    let delta = route_cost(instance, costs, v1, &r1)
                        + route_cost(instance, costs, v2, &r2)
                        - route_cost(instance, costs, v1, &candidate.routes[v1])
                        - route_cost(instance, costs, v2, &candidate.routes[v2]);
                    if delta < 0 {
                        candidate.routes[v1] = r1;
                        candidate.routes[v2] = r2;
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Reverse a segment within one route.
fn two_opt_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
) -> bool {
    for v in 0..instance.vehicles.len() {
        let len = candidate.routes[v].len();
        if len < 3 {
            continue;
        }
        let old_cost = route_cost(instance, costs, v, &candidate.routes[v]);
        for i in 0..len - 1 {
            for j in (i + 1)..len {
                let mut reversed = candidate.routes[v].clone();
                reversed[i..=j].reverse();
                if !eval_route(instance, v, &reversed).feasible {
                    continue;
                }
                if route_cost(instance, costs, v, &reversed) < old_cost {
                    candidate.routes[v] = reversed;
                    return true;
                }
            }
        }
    }
    false
}

/// Or-opt: move a two- or three-customer chain as a block, within its route
/// or to another one, keeping the chain's order.
fn or_opt_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
) -> bool {
    let vehicles = instance.vehicles.len();
    for seg_len in 2..=3usize {
        for v1 in 0..vehicles {
            let len1 = candidate.routes[v1].len();
            if len1 < seg_len {
                continue;
            }
            for start in 0..=len1 - seg_len {
                let segment: Vec<usize> =
                    candidate.routes[v1][start..start + seg_len].to_vec();
                let mut shrunk = candidate.routes[v1].clone();
                shrunk.drain(start..start + seg_len);
                if !eval_route(instance, v1, &shrunk).feasible {
                    continue;
                }
                let old_v1 = route_cost(instance, costs, v1, &candidate.routes[v1]);
                let new_v1 = route_cost(instance, costs, v1, &shrunk);

                for v2 in 0..vehicles {
                    let target: &[usize] = if v2 == v1 {
                        &shrunk
                    } else {
                        &candidate.routes[v2]
                    };
                    let old_v2 = if v2 == v1 {
                        0
                    } else {
                        route_cost(instance, costs, v2, target)
                    };
                    for pos in 0..=target.len() {
                        // Reinserting at the cut point recreates the route.
                        if v2 == v1 && pos == start {
                            continue;
                        }
                        let mut grown = Vec::with_capacity(target.len() + seg_len);
                        grown.extend_from_slice(&target[..pos]);
                        grown.extend_from_slice(&segment);
                        grown.extend_from_slice(&target[pos..]);
                        if !eval_route(instance, v2, &grown).feasible {
                            continue;
                        }
                        let new_v2 = route_cost(instance, costs, v2, &grown);
                        let delta = if v2 == v1 {
                            new_v2 - old_v1
                        } else {
                            (new_v1 - old_v1) + (new_v2 - old_v2)
                        };
                        if delta < 0 {
                            if v2 == v1 {
                                candidate.routes[v1] = grown;
                            } else {
                                candidate.routes[v1] = shrunk;
                                candidate.routes[v2] = grown;
                            }
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

/// Pull a dropped customer back in when the insertion is cheaper than its
/// dropping penalty.
fn reinsert_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    candidate: &mut Candidate,
) -> bool {
    for slot in 0..candidate.dropped.len() {
        let ci = candidate.dropped[slot];
        let penalty = drop.cost(instance.customers[ci].demand);
        for v in 0..instance.vehicles.len() {
            let route = &candidate.routes[v];
            let old_cost = route_cost(instance, costs, v, route);
            for pos in 0..=route.len() {
                if try_insert(instance, v, route, pos, ci).is_none() {
                    continue;
                }
                let mut grown = route.clone();
                grown.insert(pos, ci);
                let delta = route_cost(instance, costs, v, &grown) - old_cost;
                if delta < penalty {
                    candidate.routes[v] = grown;
                    candidate.dropped.remove(slot);
                    return true;
                }
            }
        }
    }
    false
}

/// Drop a routed customer when its detour costs more than the penalty.
fn drop_improve<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    candidate: &mut Candidate,
) -> bool {
    if !drop.allowed {
        return false;
    }
    for v in 0..instance.vehicles.len() {
        for idx in 0..candidate.routes[v].len() {
            let ci = candidate.routes[v][idx];
            let penalty = drop.cost(instance.customers[ci].demand);
            let mut shrunk = candidate.routes[v].clone();
            shrunk.remove(idx);
            let saving = route_cost(instance, costs, v, &candidate.routes[v])
                - route_cost(instance, costs, v, &shrunk);
            if saving > penalty && eval_route(instance, v, &shrunk).feasible {
                candidate.routes[v] = shrunk;
                candidate.dropped.push(ci);
                return true;
            }
        }
    }
    false
}

/// Drive a candidate to the deadline under the chosen metaheuristic.
pub fn run_metaheuristic<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    meta: Metaheuristic,
    settings: &SolverSettings,
    seed: u64,
    deadline: Instant,
    candidate: Candidate,
) -> Candidate {
    let drop = &settings.drop;
    match meta {
        Metaheuristic::GuidedLocalSearch | Metaheuristic::Automatic => {
            guided_local_search(instance, costs, drop, settings, deadline, candidate)
        }
        Metaheuristic::SimulatedAnnealing => {
            simulated_annealing(instance, costs, drop, seed, deadline, candidate)
        }
        Metaheuristic::TabuSearch => tabu_search(instance, costs, drop, deadline, candidate),
    }
}

fn mean_arc_cost<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &Candidate,
) -> i64 {
    let mut total = 0i64;
    let mut arcs = 0i64;
    for (v, route) in candidate.routes.iter().enumerate() {
        if route.is_empty() {
            continue;
        }
        total += route_cost(instance, costs, v, route);
        arcs += route.len() as i64 + 1;
    }
    if arcs == 0 {
        1
    } else {
        (total / arcs).max(1)
    }
}

fn guided_local_search<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    settings: &SolverSettings,
    deadline: Instant,
    mut candidate: Candidate,
) -> Candidate {
    let n = instance.matrix.len();
    let mut penalties = vec![vec![0i32; n]; n];

    local_search(instance, costs, drop, &mut candidate, deadline);
    let mut best = candidate.clone();
    let mut best_cost = candidate_cost(instance, costs, drop, &best);

    let weight = ((mean_arc_cost(instance, costs, &candidate) as f64) * settings.lambda)
        .round() as i64;
    let weight = weight.max(1);

    while Instant::now() < deadline {
        // Penalize the arcs of the current local optimum with maximum
        // utility cost / (1 + penalty).
        let mut max_utility = 0f64;
        let mut targets: Vec<(usize, usize)> = Vec::new();
        for (v, route) in candidate.routes.iter().enumerate() {
            if route.is_empty() {
                continue;
            }
            let unit = &instance.vehicles[v];
            let mut prev = unit.start_node;
            for &ci in route.iter() {
                let node = instance.customers[ci].node;
                let utility = costs.arc_cost(unit.class, prev, node) as f64
                    / f64::from(1 + penalties[prev][node]);
                if utility > max_utility + f64::EPSILON {
                    max_utility = utility;
                    targets.clear();
                    targets.push((prev, node));
                } else if (utility - max_utility).abs() <= f64::EPSILON {
                    targets.push((prev, node));
                }
                prev = node;
            }
        }
        if targets.is_empty() {
            break;
        }
        targets.truncate(settings.lns_num_arcs.max(1));
        for (from, to) in targets {
            penalties[from][to] += 1;
        }

        let augmented = Augmented {
            base: costs,
            penalties: &penalties,
            weight,
        };
        let inner = inner_deadline(deadline, settings.lns_time_limit);
        local_search(instance, &augmented, drop, &mut candidate, inner);

        let true_cost = candidate_cost(instance, costs, drop, &candidate);
        if true_cost < best_cost {
            best_cost = true_cost;
            best = candidate.clone();
        }
    }

    best
}

fn simulated_annealing<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    seed: u64,
    deadline: Instant,
    mut candidate: Candidate,
) -> Candidate {
    let mut rng = StdRng::seed_from_u64(seed);
    local_search(instance, costs, drop, &mut candidate, deadline);

    let mut current_cost = candidate_cost(instance, costs, drop, &candidate);
    let mut best = candidate.clone();
    let mut best_cost = current_cost;

    let mut temperature = (current_cost as f64 * 0.05).max(1.0);
    let cooling = 0.999f64;

    while Instant::now() < deadline && temperature > 0.5 {
        let Some(neighbor) = random_neighbor(instance, &candidate, &mut rng) else {
            break;
        };
        let neighbor_cost = candidate_cost(instance, costs, drop, &neighbor);
        let delta = neighbor_cost - current_cost;
        let accept = delta < 0
            || rng.gen::<f64>() < (-(delta as f64) / temperature).exp();
        if accept {
            candidate = neighbor;
            current_cost = neighbor_cost;
            if current_cost < best_cost {
                best_cost = current_cost;
                best = candidate.clone();
            }
        }
        temperature *= cooling;
    }

    // Polish the best found before returning it.
    local_search(instance, costs, drop, &mut best, deadline);
    best
}

/// One random feasible relocate or swap; `None` when the instance offers no
/// movable customer.
fn random_neighbor(
    instance: &ProblemInstance<'_>,
    candidate: &Candidate,
    rng: &mut StdRng,
) -> Option<Candidate> {
    let routed: Vec<(usize, usize)> = candidate
        .routes
        .iter()
        .enumerate()
        .flat_map(|(v, route)| (0..route.len()).map(move |i| (v, i)))
        .collect();
    if routed.is_empty() {
        return None;
    }

    for _ in 0..16 {
        let (v1, i) = routed[rng.gen_range(0..routed.len())];
        let ci = candidate.routes[v1][i];
        let v2 = rng.gen_range(0..instance.vehicles.len());

        let mut next = candidate.clone();
        if rng.gen_bool(0.5) && !next.routes[v2].is_empty() && v2 != v1 {
            // Swap.
            let j = rng.gen_range(0..next.routes[v2].len());
            let cj = next.routes[v2][j];
            next.routes[v1][i] = cj;
            next.routes[v2][j] = ci;
        } else {
            // Relocate.
            next.routes[v1].remove(i);
            let pos = rng.gen_range(0..=next.routes[v2].len());
            next.routes[v2].insert(pos, ci);
        }

        if eval_route(instance, v1, &next.routes[v1]).feasible
            && eval_route(instance, v2, &next.routes[v2]).feasible
        {
            return Some(next);
        }
    }
    None
}

fn tabu_search<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    drop: &DropPolicy,
    deadline: Instant,
    mut candidate: Candidate,
) -> Candidate {
    const TENURE: usize = 12;

    local_search(instance, costs, drop, &mut candidate, deadline);
    let mut best = candidate.clone();
    let mut best_cost = candidate_cost(instance, costs, drop, &best);
    let mut tabu: Vec<(usize, usize)> = Vec::new();
    let mut iteration = 0usize;
    let mut tabu_until: std::collections::HashMap<(usize, usize), usize> =
        std::collections::HashMap::new();

    while Instant::now() < deadline {
        iteration += 1;

        // Best relocate move in the whole neighborhood, tabu excluded unless
        // it beats the incumbent (aspiration).
        let mut best_move: Option<(usize, usize, usize, usize, i64)> = None;
        for v1 in 0..instance.vehicles.len() {
            for idx in 0..candidate.routes[v1].len() {
                let ci = candidate.routes[v1][idx];
                let mut shrunk = candidate.routes[v1].clone();
                shrunk.remove(idx);
                if !eval_route(instance, v1, &shrunk).feasible {
                    continue;
                }
                let removal_delta = route_cost(instance, costs, v1, &shrunk)
                    - route_cost(instance, costs, v1, &candidate.routes[v1]);
                for v2 in 0..instance.vehicles.len() {
                    if v2 == v1 {
                        continue;
                    }
                    let route = &candidate.routes[v2];
                    for pos in 0..=route.len() {
                        if try_insert(instance, v2, route, pos, ci).is_none() {
                            continue;
                        }
                        let mut grown = route.clone();
                        grown.insert(pos, ci);
                        let insert_delta = route_cost(instance, costs, v2, &grown)
                            - route_cost(instance, costs, v2, route);
                        let delta = removal_delta + insert_delta;

                        let is_tabu = tabu_until
                            .get(&(ci, v2))
                            .is_some_and(|&until| iteration < until);
                        let current_cost = candidate_cost(instance, costs, drop, &candidate);
                        let aspirates = current_cost + delta < best_cost;
                        if is_tabu && !aspirates {
                            continue;
                        }
                        if best_move.is_none_or(|(_, _, _, _, d)| delta < d) {
                            best_move = Some((v1, idx, v2, pos, delta));
                        }
                    }
                }
            }
        }

        let Some((v1, idx, v2, pos, _)) = best_move else { break };
        let ci = candidate.routes[v1].remove(idx);
        candidate.routes[v2].insert(pos, ci);
        // Moving back to the source route is tabu for a while.
        tabu_until.insert((ci, v1), iteration + TENURE);
        tabu.push((ci, v1));
        if tabu.len() > TENURE * 4 {
            let expired = tabu.remove(0);
            if tabu_until.get(&expired).is_some_and(|&until| until <= iteration) {
                tabu_until.remove(&expired);
            }
        }

        let cost = candidate_cost(instance, costs, drop, &candidate);
        if cost < best_cost {
            best_cost = cost;
            best = candidate.clone();
        }
    }

    local_search(instance, costs, drop, &mut best, deadline);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::matrix::Matrix;
    use crate::model::VehicleClass;
    use crate::solver::cost::CostModel;
    use crate::solver::{CustomerNode, ProblemInstance, VehicleUnit};

    /// Node 0 depot, nodes 1..=3 customers on a line 1 km apart.
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

    fn instance(matrix: &Matrix) -> ProblemInstance<'_> {
        ProblemInstance {
            matrix,
            customers: (1..4)
                .map(|node| CustomerNode {
                    id: format!("c{}", node),
                    demand: 10.0,
                    node,
                })
                .collect(),
            vehicles: vec![VehicleUnit {
                spec_index: 0,
                class: VehicleClass::Internal,
                capacity: 100.0,
                max_distance_m: None,
                max_stops: None,
                max_time_s: 8 * 3600,
                service_time_s: 0,
                start_minute: 480,
                start_node: 0,
                end_node: 0,
                tsp_origin_node: 0,
            }],
        }
    }

    #[test]
    fn or_opt_moves_a_chain_and_improves_cost() {
        let matrix = line_matrix();
        let inst = instance(&matrix);
        let costs = CostModel::plain(&matrix);

        // Nodes in visit order 3, 1, 2: an 8 km loop that a block move of
        // two customers shortens to the 6 km optimum.
        let mut candidate = Candidate {
            routes: vec![vec![2, 0, 1]],
            dropped: vec![],
            id: 0,
        };
        let before = route_cost(&inst, &costs, 0, &candidate.routes[0]);
        assert_eq!(before, 8000);

        assert!(or_opt_improve(&inst, &costs, &mut candidate));
        let after = route_cost(&inst, &costs, 0, &candidate.routes[0]);
        assert!(after < before);

        while or_opt_improve(&inst, &costs, &mut candidate) {}
        assert_eq!(route_cost(&inst, &costs, 0, &candidate.routes[0]), 6000);
        // The chain kept its customers; nothing was lost or duplicated.
        let mut served = candidate.routes[0].clone();
        served.sort_unstable();
        assert_eq!(served, vec![0, 1, 2]);
    }
}
