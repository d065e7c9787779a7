//! Improvement phase run on top of a constructed assignment.
//!
//! Every neighbor is checked by re-timing the routes it touches, so a move
//! is never applied unless the resulting routes are feasible.

use std::time::Instant;

use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::config::{FirstSolutionStrategy, LocalSearchMetaheuristic, SearchParameters};
use crate::model::DEPOT_INDEX;
use crate::solver::{construct, Assignment, RoutingModel};

/// Share of the mean arc cost used as the GLS penalty weight.
const GLS_ALPHA: f64 = 0.1;
const TABU_TENURE_MIN: usize = 3;
const TABU_TENURE_MAX: usize = 15;
const SA_INITIAL_SHARE: f64 = 0.1;
const SA_COOLING_RATE: f64 = 0.995;
const SA_MIN_TEMPERATURE: f64 = 1e-3;

/// When a search has to stop.
#[derive(Debug, Clone)]
pub struct Termination {
    deadline: Instant,
    max_iterations: usize,
    solution_limit: usize,
}

impl Termination {
    pub fn new(params: &SearchParameters, deadline: Instant) -> Self {
        Self {
            deadline,
            max_iterations: params.max_iterations,
            solution_limit: params.solution_limit,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStatistics {
    pub worker: usize,
    pub iterations: usize,
    /// Improving solutions, the constructed one included.
    pub solutions_found: usize,
    pub objective: i64,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub assignment: Assignment,
    pub statistics: SearchStatistics,
}

/// Runs construction plus improvement, on several workers when configured.
///
/// Worker `k` searches with seed `seed + k`; workers after the first also
/// rotate through the other construction heuristics. The best objective
/// wins and ties go to the lowest worker index. A worker cut off by the
/// deadline still reports what it built, with unrouted stores dropped.
pub fn run(
    model: &RoutingModel<'_>,
    params: &SearchParameters,
    termination: &Termination,
) -> SearchOutcome {
    let workers = params.num_search_workers.max(1);
    if workers == 1 {
        return run_worker(model, params, termination, 0);
    }

    let outcomes: Vec<SearchOutcome> = (0..workers)
        .into_par_iter()
        .map(|worker| run_worker(model, params, termination, worker))
        .collect();

    outcomes
        .into_iter()
        .min_by_key(|outcome| (outcome.statistics.objective, outcome.statistics.worker))
        .unwrap_or_else(|| run_worker(model, params, termination, 0))
}

fn run_worker(
    model: &RoutingModel<'_>,
    params: &SearchParameters,
    termination: &Termination,
    worker: usize,
) -> SearchOutcome {
    let strategy = worker_strategy(params.first_solution_strategy, worker);
    let initial = construct(model, strategy, termination.deadline());
    let seed = params.seed.wrapping_add(worker as u64);

    let mut search = Search::new(model, params, termination, initial, worker);
    match params.local_search_metaheuristic {
        LocalSearchMetaheuristic::GreedyDescent => search.greedy_descent(),
        LocalSearchMetaheuristic::GuidedLocalSearch | LocalSearchMetaheuristic::Automatic => {
            search.guided_local_search()
        }
        LocalSearchMetaheuristic::TabuSearch => search.tabu_search(),
        LocalSearchMetaheuristic::SimulatedAnnealing => search.simulated_annealing(seed),
    }

    search.finish()
}

fn worker_strategy(configured: FirstSolutionStrategy, worker: usize) -> FirstSolutionStrategy {
    const ROTATION: [FirstSolutionStrategy; 3] = [
        FirstSolutionStrategy::PathCheapestArc,
        FirstSolutionStrategy::ParallelCheapestInsertion,
        FirstSolutionStrategy::Savings,
    ];
    if worker == 0 {
        return configured;
    }
    let offset = ROTATION.iter().position(|&s| s == configured).unwrap_or(0);
    ROTATION[(offset + worker) % ROTATION.len()]
}

// ============================================================================
// Neighborhood
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    /// Serve a dropped store at `position` of route `to`.
    Insert { node: usize, to: usize, position: usize },
    /// Reverse `route[start..=end]`.
    TwoOpt { route: usize, start: usize, end: usize },
    /// Take the store at `index` of `from` and insert it at `position` of
    /// `to` (positions count after removal when `from == to`).
    Relocate {
        from: usize,
        index: usize,
        to: usize,
        position: usize,
    },
    /// Exchange stores between two routes.
    Swap {
        first: usize,
        first_index: usize,
        second: usize,
        second_index: usize,
    },
    /// Serve a dropped store in place of a routed one.
    Replace { route: usize, index: usize, node: usize },
    /// Leave a routed store unserved.
    Drop { route: usize, index: usize },
}

/// A feasible move, evaluated against the assignment it was built from.
#[derive(Debug, Clone)]
struct Neighbor {
    changes: Vec<(usize, Vec<usize>)>,
    served: Option<usize>,
    dropped: Option<usize>,
    moved: [Option<usize>; 2],
    delta: i64,
}

fn moves(assignment: &Assignment) -> Vec<Move> {
    let routes = &assignment.routes;
    let mut moves = Vec::new();

    for &node in &assignment.dropped {
        for (to, route) in routes.iter().enumerate() {
            for position in 0..=route.len() {
                moves.push(Move::Insert { node, to, position });
            }
        }
    }

    for (route, stores) in routes.iter().enumerate() {
        for start in 0..stores.len().saturating_sub(1) {
            for end in (start + 1)..stores.len() {
                moves.push(Move::TwoOpt { route, start, end });
            }
        }
    }

    for (from, source) in routes.iter().enumerate() {
        for index in 0..source.len() {
            for (to, target) in routes.iter().enumerate() {
                let positions = if from == to { target.len() } else { target.len() + 1 };
                for position in 0..positions {
                    if from == to && position == index {
                        continue;
                    }
                    moves.push(Move::Relocate {
                        from,
                        index,
                        to,
                        position,
                    });
                }
            }
        }
    }

    for first in 0..routes.len() {
        for second in (first + 1)..routes.len() {
            for first_index in 0..routes[first].len() {
                for second_index in 0..routes[second].len() {
                    moves.push(Move::Swap {
                        first,
                        first_index,
                        second,
                        second_index,
                    });
                }
            }
        }
    }

    for (route, stores) in routes.iter().enumerate() {
        for index in 0..stores.len() {
            for &node in &assignment.dropped {
                moves.push(Move::Replace { route, index, node });
            }
            moves.push(Move::Drop { route, index });
        }
    }

    moves
}

fn evaluate(model: &RoutingModel<'_>, assignment: &Assignment, mv: Move) -> Option<Neighbor> {
    let routes = &assignment.routes;
    match mv {
        Move::Insert { node, to, position } => {
            let mut target = routes[to].clone();
            target.insert(position, node);
            let changes = vec![(to, target)];
            Neighbor::build(model, assignment, changes, Some(node), None, [Some(node), None])
        }
        Move::TwoOpt { route, start, end } => {
            let mut candidate = routes[route].clone();
            candidate[start..=end].reverse();
            Neighbor::build(model, assignment, vec![(route, candidate)], None, None, [None, None])
        }
        Move::Relocate {
            from,
            index,
            to,
            position,
        } => {
            let mut source = routes[from].clone();
            let node = source.remove(index);
            let changes = if from == to {
                source.insert(position, node);
                vec![(from, source)]
            } else {
                let mut target = routes[to].clone();
                target.insert(position, node);
                vec![(from, source), (to, target)]
            };
            Neighbor::build(model, assignment, changes, None, None, [Some(node), None])
        }
        Move::Swap {
            first,
            first_index,
            second,
            second_index,
        } => {
            let mut a = routes[first].clone();
            let mut b = routes[second].clone();
            std::mem::swap(&mut a[first_index], &mut b[second_index]);
            let moved = [Some(a[first_index]), Some(b[second_index])];
            Neighbor::build(model, assignment, vec![(first, a), (second, b)], None, None, moved)
        }
        Move::Replace { route, index, node } => {
            let mut candidate = routes[route].clone();
            let removed = std::mem::replace(&mut candidate[index], node);
            Neighbor::build(
                model,
                assignment,
                vec![(route, candidate)],
                Some(node),
                Some(removed),
                [Some(node), Some(removed)],
            )
        }
        Move::Drop { route, index } => {
            let mut candidate = routes[route].clone();
            let removed = candidate.remove(index);
            let changes = vec![(route, candidate)];
            Neighbor::build(model, assignment, changes, None, Some(removed), [Some(removed), None])
        }
    }
}

impl Neighbor {
    fn build(
        model: &RoutingModel<'_>,
        assignment: &Assignment,
        changes: Vec<(usize, Vec<usize>)>,
        served: Option<usize>,
        dropped: Option<usize>,
        moved: [Option<usize>; 2],
    ) -> Option<Self> {
        let mut delta = 0;
        for (vehicle, route) in &changes {
            let schedule = model.schedule(*vehicle, route)?;
            delta += schedule.distance - assignment.route_costs[*vehicle];
        }
        if served.is_some() {
            delta -= model.drop_penalty();
        }
        if dropped.is_some() {
            delta += model.drop_penalty();
        }
        Some(Self {
            changes,
            served,
            dropped,
            moved,
            delta,
        })
    }

    fn apply(&self, model: &RoutingModel<'_>, assignment: &mut Assignment) {
        for (vehicle, route) in &self.changes {
            assignment.set_route(model, *vehicle, route.clone());
        }
        if let Some(node) = self.served {
            assignment.mark_served(node);
        }
        if let Some(node) = self.dropped {
            assignment.mark_dropped(node);
        }
    }
}

fn route_arcs(route: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
    let inner = route.windows(2).map(|pair| (pair[0], pair[1]));
    let ends = match (route.first(), route.last()) {
        (Some(&first), Some(&last)) => vec![(DEPOT_INDEX, first), (last, DEPOT_INDEX)],
        _ => Vec::new(),
    };
    ends.into_iter().chain(inner)
}

fn arc_key(from: usize, to: usize) -> (usize, usize) {
    (from.min(to), from.max(to))
}

// ============================================================================
// Metaheuristics
// ============================================================================

struct Search<'m, 'a> {
    model: &'m RoutingModel<'a>,
    params: &'m SearchParameters,
    termination: &'m Termination,
    current: Assignment,
    current_objective: i64,
    best: Assignment,
    statistics: SearchStatistics,
}

impl<'m, 'a> Search<'m, 'a> {
    fn new(
        model: &'m RoutingModel<'a>,
        params: &'m SearchParameters,
        termination: &'m Termination,
        initial: Assignment,
        worker: usize,
    ) -> Self {
        let objective = initial.objective(model);
        Self {
            model,
            params,
            termination,
            best: initial.clone(),
            current: initial,
            current_objective: objective,
            statistics: SearchStatistics {
                worker,
                iterations: 0,
                solutions_found: 1,
                objective,
            },
        }
    }

    fn should_stop(&self) -> bool {
        let solution_cap = self.termination.solution_limit > 0
            && self.statistics.solutions_found >= self.termination.solution_limit;
        self.statistics.iterations >= self.termination.max_iterations
            || solution_cap
            || self.termination.expired()
    }

    fn apply(&mut self, neighbor: &Neighbor) {
        neighbor.apply(self.model, &mut self.current);
        self.current_objective += neighbor.delta;
        if self.current_objective < self.statistics.objective {
            self.best = self.current.clone();
            self.statistics.objective = self.current_objective;
            self.statistics.solutions_found += 1;
            if self.params.log_search {
                debug!(
                    worker = self.statistics.worker,
                    iteration = self.statistics.iterations,
                    objective = self.current_objective,
                    dropped = self.current.dropped.len(),
                    "Improved solution"
                );
            }
        }
    }

    fn first_improving(&self, accept: impl Fn(&Neighbor) -> bool) -> Option<Neighbor> {
        moves(&self.current)
            .into_iter()
            .take_while(|_| !self.termination.expired())
            .filter_map(|mv| evaluate(self.model, &self.current, mv))
            .find(|neighbor| accept(neighbor))
    }

    /// Applies the first improving neighbor until none is left.
    fn greedy_descent(&mut self) {
        while !self.should_stop() {
            let Some(neighbor) = self.first_improving(|n| n.delta < 0) else {
                break;
            };
            self.statistics.iterations += 1;
            self.apply(&neighbor);
        }
    }

    /// Descends on distance plus `lambda * arc penalties`. At each local
    /// optimum the arcs with the highest `cost / (1 + penalty)` are penalized.
    fn guided_local_search(&mut self) {
        let mut penalties: FxHashMap<(usize, usize), i64> = FxHashMap::default();
        let mut lambda = 0;

        while !self.should_stop() {
            let augmented = |neighbor: &Neighbor| {
                neighbor.delta + lambda * penalty_delta(&penalties, &self.current, neighbor)
            };
            if let Some(neighbor) = self.first_improving(|n| augmented(n) < 0) {
                self.statistics.iterations += 1;
                self.apply(&neighbor);
                continue;
            }

            let arcs = self.current.arcs();
            if arcs.is_empty() {
                break;
            }
            if lambda == 0 {
                let mean = self.current.distance() as f64 / arcs.len() as f64;
                lambda = ((GLS_ALPHA * mean).round() as i64).max(1);
            }

            let utility = |&(from, to): &(usize, usize)| {
                let penalty = penalties.get(&arc_key(from, to)).copied().unwrap_or(0);
                self.model.arc_cost(from, to) as f64 / (1 + penalty) as f64
            };
            let max_utility = arcs.iter().map(|arc| utility(arc)).fold(f64::MIN, f64::max);
            let penalized: Vec<(usize, usize)> = arcs
                .iter()
                .filter(|arc| utility(*arc) >= max_utility)
                .map(|&(from, to)| arc_key(from, to))
                .collect();
            for key in penalized {
                *penalties.entry(key).or_insert(0) += 1;
            }
            self.statistics.iterations += 1;
        }
    }

    /// Moves to the best admissible neighbor each iteration, even uphill.
    /// Recently moved stores are tabu unless the move beats the best found.
    fn tabu_search(&mut self) {
        let tenure = (self.model.node_count() / 3).clamp(TABU_TENURE_MIN, TABU_TENURE_MAX);
        let mut tabu_until = vec![0usize; self.model.node_count()];

        while !self.should_stop() {
            let iteration = self.statistics.iterations;
            let is_tabu = |neighbor: &Neighbor| {
                neighbor
                    .moved
                    .iter()
                    .flatten()
                    .any(|&node| tabu_until[node] > iteration)
            };

            let mut chosen: Option<Neighbor> = None;
            for mv in moves(&self.current) {
                if self.termination.expired() {
                    break;
                }
                let Some(neighbor) = evaluate(self.model, &self.current, mv) else {
                    continue;
                };
                let aspires = self.current_objective + neighbor.delta < self.statistics.objective;
                if is_tabu(&neighbor) && !aspires {
                    continue;
                }
                if chosen.as_ref().is_none_or(|best| neighbor.delta < best.delta) {
                    chosen = Some(neighbor);
                }
            }

            let Some(neighbor) = chosen else {
                break;
            };
            for &node in neighbor.moved.iter().flatten() {
                tabu_until[node] = iteration + 1 + tenure;
            }
            self.statistics.iterations += 1;
            self.apply(&neighbor);
        }
    }

    /// Samples one random neighbor per iteration and accepts it with the
    /// Metropolis rule under a geometrically cooling temperature.
    fn simulated_annealing(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let arcs = self.current.arcs().len().max(1);
        let mut temperature =
            (SA_INITIAL_SHARE * self.current.distance() as f64 / arcs as f64).max(1.0);

        while !self.should_stop() {
            let candidates = moves(&self.current);
            if candidates.is_empty() {
                break;
            }
            let mv = candidates[rng.gen_range(0..candidates.len())];
            self.statistics.iterations += 1;

            if let Some(neighbor) = evaluate(self.model, &self.current, mv) {
                let accept = neighbor.delta <= 0
                    || rng.gen_range(0.0..1.0) < (-(neighbor.delta as f64) / temperature).exp();
                if accept {
                    self.apply(&neighbor);
                }
            }
            temperature = (temperature * SA_COOLING_RATE).max(SA_MIN_TEMPERATURE);
        }
    }

    fn finish(self) -> SearchOutcome {
        SearchOutcome {
            assignment: self.best,
            statistics: self.statistics,
        }
    }
}

fn penalty_delta(
    penalties: &FxHashMap<(usize, usize), i64>,
    assignment: &Assignment,
    neighbor: &Neighbor,
) -> i64 {
    if penalties.is_empty() {
        return 0;
    }
    let sum = |route: &[usize]| -> i64 {
        route_arcs(route)
            .map(|(from, to)| penalties.get(&arc_key(from, to)).copied().unwrap_or(0))
            .sum()
    };
    neighbor
        .changes
        .iter()
        .map(|(vehicle, route)| sum(route) - sum(&assignment.routes[*vehicle]))
        .sum()
}
