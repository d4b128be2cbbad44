//! First-solution construction heuristics.
//!
//! Every strategy produces a candidate whose routes are individually
//! feasible; customers that cannot be placed anywhere end up in the dropped
//! set for the search phase (or the dropping penalty) to deal with.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::FirstSolutionStrategy;
use crate::solver::cost::ArcCostSource;
use crate::solver::route::{insertion_delta, try_insert, Candidate};
use crate::solver::ProblemInstance;

pub fn build_first_solution<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    strategy: FirstSolutionStrategy,
    id: usize,
) -> Candidate {
    let mut candidate = Candidate {
        routes: vec![Vec::new(); instance.vehicles.len()],
        dropped: Vec::new(),
        id,
    };
    let mut unassigned: Vec<usize> = (0..instance.customers.len()).collect();

    match strategy {
        FirstSolutionStrategy::Savings => {
            savings(instance, costs, &mut candidate, &mut unassigned)
        }
        FirstSolutionStrategy::PathCheapestArc => {
            path_cheapest_arc(instance, costs, &mut candidate, &mut unassigned)
        }
        FirstSolutionStrategy::CheapestInsertion => {
            sequential_cheapest_insertion(instance, costs, &mut candidate, &mut unassigned)
        }
        FirstSolutionStrategy::ParallelCheapestInsertion => {
            global_cheapest_insertion(instance, costs, &mut candidate, &mut unassigned)
        }
        FirstSolutionStrategy::Christofides => {
            route_first_split(instance, costs, &mut candidate, &mut unassigned)
        }
    }

    // Whatever survives construction goes through one more global insertion
    // sweep before being declared dropped.
    global_cheapest_insertion(instance, costs, &mut candidate, &mut unassigned);
    candidate.dropped = unassigned;
    candidate
}

/// The depot most vehicle units start from; savings and the giant tour need a
/// single reference point.
fn majority_depot(instance: &ProblemInstance<'_>) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for unit in &instance.vehicles {
        *counts.entry(unit.start_node).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(node, _)| node)
        .unwrap_or(0)
}

/// Repeatedly insert the globally cheapest feasible (vehicle, customer,
/// position) triple. Deterministic: strict improvement on ties keeps the
/// first candidate found in iteration order.
fn global_cheapest_insertion<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
    unassigned: &mut Vec<usize>,
) {
    loop {
        let mut best: Option<(usize, usize, usize, i64)> = None;
        for (slot, &ci) in unassigned.iter().enumerate() {
            for v in 0..instance.vehicles.len() {
                let route = &candidate.routes[v];
                for pos in 0..=route.len() {
                    if try_insert(instance, v, route, pos, ci).is_none() {
                        continue;
                    }
                    let delta = insertion_delta(instance, costs, v, route, pos, ci);
                    if best.is_none_or(|(_, _, _, cost)| delta < cost) {
                        best = Some((slot, v, pos, delta));
                    }
                }
            }
        }
        let Some((slot, v, pos, _)) = best else { break };
        let ci = unassigned.remove(slot);
        candidate.routes[v].insert(pos, ci);
    }
}

/// One vehicle at a time, cheapest feasible insertion within that vehicle.
fn sequential_cheapest_insertion<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
    unassigned: &mut Vec<usize>,
) {
    for v in 0..instance.vehicles.len() {
        loop {
            let route = &candidate.routes[v];
            let mut best: Option<(usize, usize, i64)> = None;
            for (slot, &ci) in unassigned.iter().enumerate() {
                for pos in 0..=route.len() {
                    if try_insert(instance, v, route, pos, ci).is_none() {
                        continue;
                    }
                    let delta = insertion_delta(instance, costs, v, route, pos, ci);
                    if best.is_none_or(|(_, _, cost)| delta < cost) {
                        best = Some((slot, pos, delta));
                    }
                }
            }
            let Some((slot, pos, _)) = best else { break };
            let ci = unassigned.remove(slot);
            candidate.routes[v].insert(pos, ci);
        }
    }
}

/// Grow each route by the cheapest outgoing arc from its current end.
fn path_cheapest_arc<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
    unassigned: &mut Vec<usize>,
) {
    for v in 0..instance.vehicles.len() {
        let unit = &instance.vehicles[v];
        loop {
            let route = &candidate.routes[v];
            let tail = route
                .last()
                .map(|&ci| instance.customers[ci].node)
                .unwrap_or(unit.start_node);
            let mut best: Option<(usize, i64)> = None;
            for (slot, &ci) in unassigned.iter().enumerate() {
                if try_insert(instance, v, route, route.len(), ci).is_none() {
                    continue;
                }
                let arc = costs.arc_cost(unit.class, tail, instance.customers[ci].node);
                if best.is_none_or(|(_, cost)| arc < cost) {
                    best = Some((slot, arc));
                }
            }
            let Some((slot, _)) = best else { break };
            let ci = unassigned.remove(slot);
            candidate.routes[v].push(ci);
        }
    }
}

/// Clarke-Wright savings, generalized to the heterogeneous fleet: clusters
/// are merged under the fleet's loosest limits, then bound to concrete
/// vehicles cheapest-first.
fn savings<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    costs: &C,
    candidate: &mut Candidate,
    unassigned: &mut Vec<usize>,
) {
    let n = instance.customers.len();
    if n == 0 {
        return;
    }
    let depot = majority_depot(instance);
    let max_capacity = instance
        .vehicles
        .iter()
        .map(|u| u.capacity)
        .fold(0.0f64, f64::max);
    let max_stops = instance
        .vehicles
        .iter()
        .map(|u| u.max_stops.unwrap_or(usize::MAX))
        .max()
        .unwrap_or(usize::MAX);

    struct Saving {
        i: usize,
        j: usize,
        value: i64,
    }

    let dist = |a: usize, b: usize| instance.matrix.distance(a, b);
    let node = |ci: usize| instance.customers[ci].node;

    let mut savings = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let value = dist(depot, node(i)) + dist(depot, node(j)) - dist(node(i), node(j));
            savings.push(Saving { i, j, value });
        }
    }
    savings.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then_with(|| a.i.cmp(&b.i))
            .then_with(|| a.j.cmp(&b.j))
    });

    // cluster_of[ci] -> cluster index; clusters keep their visit order.
    let mut clusters: Vec<Vec<usize>> = (0..n).map(|ci| vec![ci]).collect();
    let mut cluster_of: Vec<usize> = (0..n).collect();
    let mut demands: Vec<f64> = instance.customers.iter().map(|c| c.demand).collect();

    for saving in savings {
        if saving.value <= 0 {
            break;
        }
        let (a, b) = (cluster_of[saving.i], cluster_of[saving.j]);
        if a == b || clusters[a].is_empty() || clusters[b].is_empty() {
            continue;
        }
        if demands[a] + demands[b] > max_capacity {
            continue;
        }
        if clusters[a].len() + clusters[b].len() > max_stops {
            continue;
        }
        // Merge only end-to-end so each cluster stays one open path.
        let a_tail = *clusters[a].last().unwrap_or(&saving.i) == saving.i;
        let b_head = *clusters[b].first().unwrap_or(&saving.j) == saving.j;
        let a_head = *clusters[a].first().unwrap_or(&saving.i) == saving.i;
        let b_tail = *clusters[b].last().unwrap_or(&saving.j) == saving.j;

        let merged: Vec<usize> = if a_tail && b_head {
            clusters[a].iter().chain(clusters[b].iter()).copied().collect()
        } else if b_tail && a_head {
            clusters[b].iter().chain(clusters[a].iter()).copied().collect()
        } else if a_tail && b_tail {
            clusters[a]
                .iter()
                .chain(clusters[b].iter().rev())
                .copied()
                .collect()
        } else if a_head && b_head {
            clusters[a]
                .iter()
                .rev()
                .chain(clusters[b].iter())
                .copied()
                .collect()
        } else {
            continue;
        };

        demands[a] += demands[b];
        clusters[b].clear();
        for &ci in &merged {
            cluster_of[ci] = a;
        }
        clusters[a] = merged;
    }

    // Bind clusters to vehicles, biggest demand first, cheapest feasible
    // vehicle wins. Unplaceable clusters dissolve back into the pool.
    let mut order: Vec<usize> = (0..clusters.len()).filter(|&c| !clusters[c].is_empty()).collect();
    order.sort_by(|&a, &b| {
        demands[b]
            .partial_cmp(&demands[a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    for c in order {
        let sequence = clusters[c].clone();
        let mut best: Option<(usize, i64)> = None;
        for v in 0..instance.vehicles.len() {
            if !candidate.routes[v].is_empty() {
                continue;
            }
            let eval = crate::solver::route::eval_route(instance, v, &sequence);
            if !eval.feasible {
                continue;
            }
            let cost = crate::solver::route::route_cost(instance, costs, v, &sequence);
            if best.is_none_or(|(_, current)| cost < current) {
                best = Some((v, cost));
            }
        }
        if let Some((v, _)) = best {
            candidate.routes[v] = sequence.clone();
            unassigned.retain(|ci| !sequence.contains(ci));
        }
    }
}

/// Route-first, cluster-second: one giant tour over all customers, improved
/// with 2-opt, then cut into vehicle-sized segments in order.
fn route_first_split<C: ArcCostSource>(
    instance: &ProblemInstance<'_>,
    _costs: &C,
    candidate: &mut Candidate,
    unassigned: &mut Vec<usize>,
) {
    let n = instance.customers.len();
    if n == 0 {
        return;
    }
    let depot = majority_depot(instance);
    let node = |ci: usize| instance.customers[ci].node;
    let dist = |a: usize, b: usize| instance.matrix.distance(a, b);

    // Nearest-neighbor giant tour.
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut tour = Vec::with_capacity(n);
    let mut current = depot;
    while !remaining.is_empty() {
        let (slot, _) = remaining
            .iter()
            .enumerate()
            .map(|(slot, &ci)| (slot, dist(current, node(ci))))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .unwrap_or((0, 0));
        let ci = remaining.remove(slot);
        current = node(ci);
        tour.push(ci);
    }

    // A few 2-opt passes over the giant tour.
    for _ in 0..3 {
        let mut improved = false;
        for i in 0..n.saturating_sub(1) {
            for j in (i + 2)..n {
                let prev = if i == 0 { depot } else { node(tour[i - 1]) };
                let after = if j + 1 == n { depot } else { node(tour[j + 1]) };
                let before = dist(prev, node(tour[i])) + dist(node(tour[j]), after);
                let after_swap = dist(prev, node(tour[j])) + dist(node(tour[i]), after);
                if after_swap < before {
                    tour[i..=j].reverse();
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }

    // Cut the tour into consecutive feasible segments, one vehicle at a time.
    let mut v = 0usize;
    for ci in tour {
        while v < instance.vehicles.len() {
            let route = &candidate.routes[v];
            if try_insert(instance, v, route, route.len(), ci).is_some() {
                candidate.routes[v].push(ci);
                unassigned.retain(|&u| u != ci);
                break;
            }
            v += 1;
        }
        if v >= instance.vehicles.len() {
            break;
        }
    }
}
