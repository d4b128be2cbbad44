//! Backend A: dimension-constrained metaheuristic search.
//!
//! The routing model tracks four dimensions per route (capacity, distance,
//! stops, time) through [`crate::solver::route::eval_route`]; arc costs
//! dispatch on vehicle class inside a single evaluator; each customer is a
//! disjunction whose penalty is its dropping cost. The optional
//! multi-strategy mode fans out workers over (first-solution, metaheuristic)
//! pairs and picks the winner deterministically.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{FirstSolutionStrategy, Metaheuristic};
use crate::solver::construct::build_first_solution;
use crate::solver::cost::CostModel;
use crate::solver::route::Candidate;
use crate::solver::search::{local_search, run_metaheuristic};
use crate::solver::{select_winner, ProblemInstance, SolverSettings};

pub fn solve(
    instance: &ProblemInstance<'_>,
    costs: &CostModel,
    settings: &SolverSettings,
) -> Option<Candidate> {
    let deadline = Instant::now() + settings.time_limit;

    let strategies = if settings.first_solution_strategies.is_empty() {
        vec![FirstSolutionStrategy::Savings]
    } else {
        settings.first_solution_strategies.clone()
    };
    let metaheuristics = if settings.metaheuristics.is_empty() {
        vec![Metaheuristic::Automatic]
    } else {
        settings.metaheuristics.clone()
    };

    if settings.parallel && settings.workers > 1 {
        solve_multi_strategy(instance, costs, settings, &strategies, &metaheuristics, deadline)
    } else {
        let candidate = run_worker(
            instance,
            costs,
            settings,
            strategies[0],
            metaheuristics[0],
            0,
            deadline,
        );
        Some(candidate)
    }
}

/// W independent workers, strategy pairs drawn cyclically, each seeded by its
/// worker index. Workers share nothing mutable; the result channel is the
/// collected vector.
fn solve_multi_strategy(
    instance: &ProblemInstance<'_>,
    costs: &CostModel,
    settings: &SolverSettings,
    strategies: &[FirstSolutionStrategy],
    metaheuristics: &[Metaheuristic],
    deadline: Instant,
) -> Option<Candidate> {
    let workers = settings.workers;
    let assignments: Vec<(usize, FirstSolutionStrategy, Metaheuristic)> = (0..workers)
        .map(|i| {
            (
                i,
                strategies[i % strategies.len()],
                metaheuristics[i % metaheuristics.len()],
            )
        })
        .collect();

    info!(workers, "multi-strategy solve started");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .ok()?;

    let candidates: Vec<Candidate> = pool.install(|| {
        assignments
            .par_iter()
            .map(|&(id, strategy, meta)| {
                run_worker(instance, costs, settings, strategy, meta, id, deadline)
            })
            .collect()
    });

    select_winner(instance, &settings.drop, candidates)
}

fn run_worker(
    instance: &ProblemInstance<'_>,
    costs: &CostModel,
    settings: &SolverSettings,
    strategy: FirstSolutionStrategy,
    meta: Metaheuristic,
    worker_id: usize,
    deadline: Instant,
) -> Candidate {
    debug!(worker_id, ?strategy, ?meta, "solver worker started");
    let mut candidate = build_first_solution(instance, costs, strategy, worker_id);
    local_search(instance, costs, &settings.drop, &mut candidate, deadline);
    run_metaheuristic(
        instance,
        costs,
        meta,
        settings,
        worker_id as u64,
        deadline,
        candidate,
    )
}
