//! Backend B: iterated local search over two precomputed routing profiles.
//!
//! The center-zone rule is baked into two arc-cost tables (center class vs
//! everything else) derived from the traffic-adjusted matrix; vehicle units
//! answer from the table matching their class. Capacity and stop count ride
//! the same two-dimensional load check, dropping pays a per-customer prize of
//! `base + demand * k`, and the whole search runs under a single seed.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::FirstSolutionStrategy;
use crate::solver::construct::build_first_solution;
use crate::solver::cost::{CostModel, ProfileTables};
use crate::solver::route::{candidate_cost, Candidate};
use crate::solver::search::{inner_deadline, local_search};
use crate::solver::{ProblemInstance, SolverSettings};

const SEED: u64 = 0x5eed;

pub fn solve(
    instance: &ProblemInstance<'_>,
    costs: &CostModel,
    settings: &SolverSettings,
) -> Option<Candidate> {
    let deadline = Instant::now() + settings.time_limit;
    let tables = ProfileTables::from_model(costs);
    let mut rng = StdRng::seed_from_u64(SEED);

    let mut current = build_first_solution(
        instance,
        &tables,
        FirstSolutionStrategy::ParallelCheapestInsertion,
        0,
    );
    local_search(instance, &tables, &settings.drop, &mut current, deadline);
    let mut current_cost = candidate_cost(instance, &tables, &settings.drop, &current);

    let mut best = current.clone();
    let mut best_cost = current_cost;
    let mut iterations = 0usize;

    while Instant::now() < deadline {
        iterations += 1;
        let mut trial = current.clone();
        perturb(&mut trial, settings.lns_num_nodes, &mut rng);
        // Each repair round gets the inner neighborhood budget, clipped to
        // the global deadline.
        let inner = inner_deadline(deadline, settings.lns_time_limit);
        local_search(instance, &tables, &settings.drop, &mut trial, inner);

        let trial_cost = candidate_cost(instance, &tables, &settings.drop, &trial);
        if trial_cost < current_cost {
            current = trial;
            current_cost = trial_cost;
            if current_cost < best_cost {
                best = current.clone();
                best_cost = current_cost;
            }
        }
    }

    debug!(iterations, best_cost, "iterated local search finished");
    Some(best)
}

/// Ruin step: eject up to `budget` random routed customers into the dropped
/// set; the following local search rebuilds around the hole.
fn perturb(candidate: &mut Candidate, budget: usize, rng: &mut StdRng) {
    let served: usize = candidate.routes.iter().map(Vec::len).sum();
    if served == 0 {
        return;
    }
    let eject = budget.clamp(1, served.div_ceil(3).max(1));

    for _ in 0..eject {
        let routed: Vec<(usize, usize)> = candidate
            .routes
            .iter()
            .enumerate()
            .flat_map(|(v, route)| (0..route.len()).map(move |i| (v, i)))
            .collect();
        if routed.is_empty() {
            break;
        }
        let (v, i) = routed[rng.gen_range(0..routed.len())];
        let ci = candidate.routes[v].remove(i);
        candidate.dropped.push(ci);
    }
}
