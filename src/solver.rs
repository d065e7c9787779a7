//! CVRPTW routing solver.
//!
//! One solve covers one demand scenario: the depot is node 0, stores are
//! nodes 1..=N. Every store may be dropped at a fixed penalty, so the model
//! always admits the trivial assignment and infeasible stores never make the
//! whole solve fail.
//!
//! Search is deterministic for a fixed configuration as long as it stops on
//! its iteration or solution cap. A solve cut short by the wall-clock budget
//! stops at a machine-dependent point, so only the total distance (not the
//! exact sequence) should be expected to repeat in that case.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{FirstSolutionStrategy, PlannerConfig};
use crate::error::{MatrixError, PlannerError};
use crate::matrix::{build_for_config, TravelMatrices};
use crate::model::{
    DemandScenario, PlanningInput, RouteSolution, ScenarioResult, DEPOT_INDEX,
};
use crate::search::{self, SearchOutcome, Termination};
use crate::traits::ScenarioSolver;

/// Upper bound on any single solve budget.
const MAX_SOLVE_TIME: Duration = Duration::from_secs(7 * 24 * 3600);

/// Demand and capacity are counted in thousandths of a unit.
pub const DEMAND_SCALE: f64 = 1000.0;

/// Slack absorbing float noise such as `33.0 * 1.1`, in scaled units.
const DEMAND_EPSILON: f64 = 1e-6;

/// Integer view of one scenario, ready for search.
#[derive(Debug, Clone)]
pub struct RoutingModel<'a> {
    matrices: &'a TravelMatrices,
    demands: Vec<i64>,
    windows: Vec<(i64, i64)>,
    service_time: Vec<i64>,
    capacities: Vec<i64>,
    max_durations: Vec<i64>,
    max_wait: i64,
    drop_penalty: i64,
}

/// Timing of one feasible route.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Service start per node, depot start and depot return included.
    pub times: Vec<i64>,
    /// Scaled distance.
    pub distance: i64,
    pub load: i64,
}

impl<'a> RoutingModel<'a> {
    pub fn new(
        input: &PlanningInput,
        scenario: &DemandScenario,
        matrices: &'a TravelMatrices,
        config: &PlannerConfig,
    ) -> Self {
        let locations = input.locations();

        let demands = locations
            .iter()
            .enumerate()
            .map(|(node, location)| {
                if node == DEPOT_INDEX {
                    0
                } else {
                    demand_units(scenario.demand_for(location))
                }
            })
            .collect();

        let windows = locations
            .iter()
            .map(|location| (location.window_start, location.window_end))
            .collect();

        let service_time = (0..locations.len())
            .map(|node| {
                if node == DEPOT_INDEX {
                    0
                } else {
                    config.service_time_min
                }
            })
            .collect();

        Self {
            matrices,
            demands,
            windows,
            service_time,
            capacities: input
                .vehicles
                .iter()
                .map(|vehicle| capacity_units(vehicle.capacity))
                .collect(),
            max_durations: input
                .vehicles
                .iter()
                .map(|vehicle| vehicle.max_route_duration_min)
                .collect(),
            max_wait: config.max_wait_min,
            drop_penalty: config.drop_penalty,
        }
    }

    pub fn node_count(&self) -> usize {
        self.demands.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.capacities.len()
    }

    pub fn demand(&self, node: usize) -> i64 {
        self.demands[node]
    }

    pub fn capacity(&self, vehicle: usize) -> i64 {
        self.capacities[vehicle]
    }

    pub fn drop_penalty(&self) -> i64 {
        self.drop_penalty
    }

    /// Scaled distance, identical for every vehicle.
    pub fn arc_cost(&self, from: usize, to: usize) -> i64 {
        self.matrices.scaled_distance[from][to]
    }

    /// Travel time plus the service time spent at `from`.
    pub fn transit_time(&self, from: usize, to: usize) -> i64 {
        self.matrices.time_min[from][to] + self.service_time[from]
    }

    pub fn route_distance(&self, route: &[usize]) -> i64 {
        let mut prev = DEPOT_INDEX;
        let mut total = 0;
        for &node in route {
            total += self.arc_cost(prev, node);
            prev = node;
        }
        total + self.arc_cost(prev, DEPOT_INDEX)
    }

    /// Times a route for `vehicle`, or `None` if it breaks capacity, a time
    /// window, the waiting slack, the depot hours or the vehicle's maximum
    /// route duration.
    ///
    /// The vehicle leaves the depot late enough to reach its first stop as
    /// that stop opens (never before the depot opens); after that, waiting at
    /// any stop is bounded by the configured slack.
    pub fn schedule(&self, vehicle: usize, route: &[usize]) -> Option<Schedule> {
        let load: i64 = route.iter().map(|&node| self.demands[node]).sum();
        if load > self.capacities[vehicle] {
            return None;
        }

        let (depot_open, depot_close) = self.windows[DEPOT_INDEX];
        let Some(&first) = route.first() else {
            return Some(Schedule {
                times: vec![depot_open, depot_open],
                distance: 0,
                load: 0,
            });
        };

        let start = depot_open.max(self.windows[first].0 - self.transit_time(DEPOT_INDEX, first));
        if start > depot_close {
            return None;
        }

        let mut times = Vec::with_capacity(route.len() + 2);
        times.push(start);
        let mut time = start;
        let mut prev = DEPOT_INDEX;

        for &node in route {
            let arrival = time + self.transit_time(prev, node);
            let (open, close) = self.windows[node];
            let service_start = arrival.max(open);
            if service_start - arrival > self.max_wait || service_start > close {
                return None;
            }
            times.push(service_start);
            time = service_start;
            prev = node;
        }

        let end = time + self.transit_time(prev, DEPOT_INDEX);
        if end > depot_close || end - start > self.max_durations[vehicle] {
            return None;
        }
        times.push(end);

        Some(Schedule {
            times,
            distance: self.route_distance(route),
            load,
        })
    }

    pub fn is_feasible(&self, vehicle: usize, route: &[usize]) -> bool {
        self.schedule(vehicle, route).is_some()
    }
}

/// Demand rounds up and capacity rounds down, so a route that fits in scaled
/// units never exceeds the real capacity.
fn demand_units(demand: f64) -> i64 {
    (demand.max(0.0) * DEMAND_SCALE - DEMAND_EPSILON).ceil().max(0.0) as i64
}

fn capacity_units(capacity: f64) -> i64 {
    (capacity.max(0.0) * DEMAND_SCALE + DEMAND_EPSILON).floor() as i64
}

// ============================================================================
// Assignment
// ============================================================================

/// Store sequences per vehicle plus the stores left unserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub routes: Vec<Vec<usize>>,
    /// Scaled distance per route.
    pub route_costs: Vec<i64>,
    /// Sorted ascending.
    pub dropped: Vec<usize>,
}

impl Assignment {
    /// Every store dropped, every vehicle idle.
    pub fn all_dropped(model: &RoutingModel<'_>) -> Self {
        Self {
            routes: vec![Vec::new(); model.vehicle_count()],
            route_costs: vec![0; model.vehicle_count()],
            dropped: (1..model.node_count()).collect(),
        }
    }

    /// Builds an assignment from routes; unrouted stores are dropped.
    pub fn from_routes(model: &RoutingModel<'_>, routes: Vec<Vec<usize>>) -> Self {
        let mut routed = vec![false; model.node_count()];
        for &node in routes.iter().flatten() {
            routed[node] = true;
        }
        let route_costs = routes
            .iter()
            .map(|route| model.route_distance(route))
            .collect();
        let dropped = (1..model.node_count()).filter(|&node| !routed[node]).collect();
        Self {
            routes,
            route_costs,
            dropped,
        }
    }

    pub fn distance(&self) -> i64 {
        self.route_costs.iter().sum()
    }

    /// Arc costs plus drop penalties.
    pub fn objective(&self, model: &RoutingModel<'_>) -> i64 {
        self.distance() + model.drop_penalty() * self.dropped.len() as i64
    }

    pub fn set_route(&mut self, model: &RoutingModel<'_>, vehicle: usize, route: Vec<usize>) {
        self.route_costs[vehicle] = model.route_distance(&route);
        self.routes[vehicle] = route;
    }

    pub fn mark_dropped(&mut self, node: usize) {
        if let Err(pos) = self.dropped.binary_search(&node) {
            self.dropped.insert(pos, node);
        }
    }

    pub fn mark_served(&mut self, node: usize) {
        if let Ok(pos) = self.dropped.binary_search(&node) {
            self.dropped.remove(pos);
        }
    }

    /// Every arc used, depot legs included.
    pub fn arcs(&self) -> Vec<(usize, usize)> {
        let mut arcs = Vec::new();
        for route in self.routes.iter().filter(|route| !route.is_empty()) {
            let mut prev = DEPOT_INDEX;
            for &node in route {
                arcs.push((prev, node));
                prev = node;
            }
            arcs.push((prev, DEPOT_INDEX));
        }
        arcs
    }
}

// ============================================================================
// Construction Heuristics
// ============================================================================

/// Builds a first assignment. Once the deadline passes, construction stops
/// and the stores not yet routed stay dropped.
pub fn construct(
    model: &RoutingModel<'_>,
    strategy: FirstSolutionStrategy,
    deadline: Instant,
) -> Assignment {
    match strategy {
        FirstSolutionStrategy::PathCheapestArc => path_cheapest_arc(model, deadline),
        FirstSolutionStrategy::ParallelCheapestInsertion | FirstSolutionStrategy::Automatic => {
            parallel_cheapest_insertion(model, deadline)
        }
        FirstSolutionStrategy::Savings => savings(model, deadline),
    }
}

/// Grows one route at a time along the cheapest feasible arc from its tail.
fn path_cheapest_arc(model: &RoutingModel<'_>, deadline: Instant) -> Assignment {
    let mut unrouted: Vec<usize> = (1..model.node_count()).collect();
    let mut routes = vec![Vec::new(); model.vehicle_count()];

    'vehicles: for (vehicle, route) in routes.iter_mut().enumerate() {
        loop {
            if Instant::now() >= deadline {
                break 'vehicles;
            }
            let tail = route.last().copied().unwrap_or(DEPOT_INDEX);
            let mut candidates = unrouted.clone();
            candidates.sort_by_key(|&node| (model.arc_cost(tail, node), node));

            let next = candidates.into_iter().find(|&node| {
                route.push(node);
                let feasible = model.is_feasible(vehicle, route);
                route.pop();
                feasible
            });

            match next {
                Some(node) => {
                    route.push(node);
                    unrouted.retain(|&n| n != node);
                }
                None => break,
            }
        }
    }

    Assignment::from_routes(model, routes)
}

/// Repeatedly inserts the store whose cheapest feasible insertion, over all
/// routes and positions, adds the least distance.
fn parallel_cheapest_insertion(model: &RoutingModel<'_>, deadline: Instant) -> Assignment {
    let mut assignment = Assignment::all_dropped(model);

    while Instant::now() < deadline {
        let mut best: Option<(i64, usize, usize, usize)> = None;
        for &node in &assignment.dropped {
            for vehicle in 0..model.vehicle_count() {
                let route = &assignment.routes[vehicle];
                for position in 0..=route.len() {
                    let mut candidate = route.clone();
                    candidate.insert(position, node);
                    if !model.is_feasible(vehicle, &candidate) {
                        continue;
                    }
                    let delta = model.route_distance(&candidate) - assignment.route_costs[vehicle];
                    if best.is_none_or(|(cost, ..)| delta < cost) {
                        best = Some((delta, node, vehicle, position));
                    }
                }
            }
        }

        let Some((_, node, vehicle, position)) = best else {
            break;
        };
        let mut route = assignment.routes[vehicle].clone();
        route.insert(position, node);
        assignment.set_route(model, vehicle, route);
        assignment.mark_served(node);
    }

    assignment
}

/// Clarke-Wright savings: start from single-store routes, merge tail-to-head
/// in decreasing order of `d(0,i) + d(0,j) - d(i,j)` while the merged route
/// stays feasible for the largest vehicle, then hand routes to vehicles.
fn savings(model: &RoutingModel<'_>, deadline: Instant) -> Assignment {
    let n = model.node_count();
    let largest = (0..model.vehicle_count())
        .max_by_key(|&vehicle| (model.capacity(vehicle), std::cmp::Reverse(vehicle)))
        .unwrap_or(0);

    let mut savings = Vec::new();
    for i in 1..n {
        for j in (i + 1)..n {
            let value = model.arc_cost(DEPOT_INDEX, i) + model.arc_cost(DEPOT_INDEX, j)
                - model.arc_cost(i, j);
            if value > 0 {
                savings.push((value, i, j));
            }
        }
    }
    savings.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut route_of: Vec<Option<usize>> = vec![None; n];
    let mut members: Vec<Vec<usize>> = Vec::new();
    for node in 1..n {
        if model.is_feasible(largest, &[node]) {
            route_of[node] = Some(members.len());
            members.push(vec![node]);
        }
    }

    for (_, i, j) in savings {
        if Instant::now() >= deadline {
            break;
        }
        let (Some(ri), Some(rj)) = (route_of[i], route_of[j]) else {
            continue;
        };
        if ri == rj {
            continue;
        }

        let merged = if members[ri].last() == Some(&i) && members[rj].first() == Some(&j) {
            Some([members[ri].as_slice(), members[rj].as_slice()].concat())
        } else if members[rj].last() == Some(&j) && members[ri].first() == Some(&i) {
            Some([members[rj].as_slice(), members[ri].as_slice()].concat())
        } else {
            None
        };

        let Some(merged) = merged.filter(|route| model.is_feasible(largest, route)) else {
            continue;
        };
        for &node in &merged {
            route_of[node] = Some(ri);
        }
        members[ri] = merged;
        members[rj].clear();
    }

    // Largest loads go to the largest vehicles that can run them.
    let mut merged_routes: Vec<Vec<usize>> =
        members.into_iter().filter(|route| !route.is_empty()).collect();
    merged_routes.sort_by_key(|route| {
        std::cmp::Reverse(route.iter().map(|&node| model.demand(node)).sum::<i64>())
    });

    let mut vehicles: Vec<usize> = (0..model.vehicle_count()).collect();
    vehicles.sort_by_key(|&vehicle| (std::cmp::Reverse(model.capacity(vehicle)), vehicle));

    let mut routes = vec![Vec::new(); model.vehicle_count()];
    let mut free = vec![true; model.vehicle_count()];
    for route in merged_routes {
        if let Some(&vehicle) = vehicles
            .iter()
            .find(|&&vehicle| free[vehicle] && model.is_feasible(vehicle, &route))
        {
            free[vehicle] = false;
            routes[vehicle] = route;
        }
    }

    Assignment::from_routes(model, routes)
}

// ============================================================================
// Solver
// ============================================================================

/// Solves demand scenarios over one planning input and its shared matrices.
///
/// The input and matrices are only read, so one solver can serve many
/// concurrent scenario solves.
#[derive(Debug, Clone)]
pub struct RoutingSolver<'a> {
    input: &'a PlanningInput,
    matrices: &'a TravelMatrices,
    config: &'a PlannerConfig,
}

impl<'a> RoutingSolver<'a> {
    pub fn new(
        input: &'a PlanningInput,
        matrices: &'a TravelMatrices,
        config: &'a PlannerConfig,
    ) -> Result<Self, PlannerError> {
        input.validate()?;
        config.validate()?;
        let expected = input.stores.len() + 1;
        if matrices.size() != expected {
            return Err(MatrixError::DimensionMismatch {
                rows: matrices.size(),
                expected,
            }
            .into());
        }
        Ok(Self {
            input,
            matrices,
            config,
        })
    }

    pub fn input(&self) -> &PlanningInput {
        self.input
    }

    pub fn matrices(&self) -> &TravelMatrices {
        self.matrices
    }

    pub fn config(&self) -> &PlannerConfig {
        self.config
    }

    pub fn model(&self, scenario: &DemandScenario) -> RoutingModel<'a> {
        RoutingModel::new(self.input, scenario, self.matrices, self.config)
    }

    /// Solves with the configured time budget.
    ///
    /// Always yields a plan: stores that could not be routed in time, or at
    /// all, are listed as dropped.
    pub fn solve(&self, scenario: &DemandScenario) -> ScenarioResult {
        self.solve_with_limit(scenario, self.config.search.time_limit())
    }

    pub fn solve_with_limit(
        &self,
        scenario: &DemandScenario,
        time_limit: Duration,
    ) -> ScenarioResult {
        let time_limit = time_limit.min(MAX_SOLVE_TIME);
        let started = Instant::now();
        let model = self.model(scenario);
        let termination = Termination::new(&self.config.search, started + time_limit);

        let SearchOutcome {
            assignment,
            statistics,
        } = search::run(&model, &self.config.search, &termination);
        if termination.expired() && statistics.iterations == 0 {
            warn!(
                scenario = %scenario.id,
                dropped = assignment.dropped.len(),
                "Time budget ran out during construction"
            );
        }

        debug!(
            scenario = %scenario.id,
            objective = statistics.objective,
            iterations = statistics.iterations,
            solutions = statistics.solutions_found,
            dropped = assignment.dropped.len(),
            "Scenario solved"
        );

        self.extract(scenario, &model, &assignment, started.elapsed())
    }

    fn extract(
        &self,
        scenario: &DemandScenario,
        model: &RoutingModel<'_>,
        assignment: &Assignment,
        solve_time: Duration,
    ) -> ScenarioResult {
        let locations = self.input.locations();
        let mut routes = Vec::new();
        let mut dropped = assignment.dropped.clone();

        for (vehicle, route) in assignment.routes.iter().enumerate() {
            if route.is_empty() {
                continue;
            }
            let Some(schedule) = model.schedule(vehicle, route) else {
                warn!(
                    scenario = %scenario.id,
                    vehicle = vehicle,
                    "Route failed re-timing, reporting its stores as dropped"
                );
                dropped.extend_from_slice(route);
                continue;
            };
            let spec = &self.input.vehicles[vehicle];

            let mut sequence = Vec::with_capacity(route.len() + 2);
            sequence.push(DEPOT_INDEX);
            sequence.extend_from_slice(route);
            sequence.push(DEPOT_INDEX);

            let last = schedule.times.len() - 1;
            let departure_times = schedule
                .times
                .iter()
                .enumerate()
                .map(|(position, &time)| {
                    if position == 0 || position == last {
                        time
                    } else {
                        time + self.config.service_time_min
                    }
                })
                .collect();

            let leg_distances_km: Vec<f64> = sequence
                .windows(2)
                .map(|leg| self.matrices.distance_km[leg[0]][leg[1]])
                .collect();
            let distance_km: f64 = leg_distances_km.iter().sum();

            let at_risk = route
                .iter()
                .zip(&schedule.times[1..])
                .filter(|&(&node, &time)| {
                    locations[node].window_end - time < self.config.sla_margin_min
                })
                .count();

            routes.push(RouteSolution {
                vehicle_id: spec.id.clone(),
                store_ids: route.iter().map(|&node| locations[node].id.clone()).collect(),
                arrival_times: schedule.times.clone(),
                departure_times,
                leg_distances_km,
                distance_km,
                duration_min: schedule.times[schedule.times.len() - 1] - schedule.times[0],
                load: route
                    .iter()
                    .map(|&node| scenario.demand_for(locations[node]))
                    .sum(),
                capacity: spec.capacity,
                cost: distance_km * spec.cost_per_km,
                sla_risk_score: at_risk as f64 / route.len() as f64,
                sequence,
            });
        }

        dropped.sort_unstable();
        ScenarioResult {
            scenario_id: scenario.id.clone(),
            ratio: scenario.ratio,
            weight: scenario.weight,
            routes,
            dropped_store_ids: dropped
                .iter()
                .map(|&node| locations[node].id.clone())
                .collect(),
            dropped_nodes: dropped,
            candidate_count: self.input.stores.len(),
            objective: assignment.objective(model),
            solve_time,
        }
    }
}

impl ScenarioSolver for RoutingSolver<'_> {
    fn solve_scenario(
        &self,
        scenario: &DemandScenario,
        time_limit: Option<Duration>,
    ) -> Option<ScenarioResult> {
        let result = match time_limit {
            Some(limit) => self.solve_with_limit(scenario, limit),
            None => self.solve(scenario),
        };
        Some(result)
    }
}

/// Builds matrices for `input` and solves its baseline demand.
pub fn solve_baseline(
    input: &PlanningInput,
    config: &PlannerConfig,
) -> Result<ScenarioResult, PlannerError> {
    let matrices = build_for_config(config, &input.coordinates())?;
    let solver = RoutingSolver::new(input, &matrices, config)?;
    Ok(solver.solve(&DemandScenario::baseline(&input.stores)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, VehicleSpec};

    fn input(capacity: f64) -> PlanningInput {
        PlanningInput::new(
            Location::depot("DC", 0.0, 0.0, 480, 1080),
            vec![
                Location::store("A", 0.0, 0.1, (480, 1080), 10.0),
                Location::store("B", 0.0, 0.2, (480, 1080), 10.0),
                Location::store("C", 0.0, -0.1, (480, 1080), 10.0),
            ],
            vec![VehicleSpec::new("V1", capacity), VehicleSpec::new("V2", capacity)],
        )
        .unwrap()
    }

    fn matrices(input: &PlanningInput) -> TravelMatrices {
        build_for_config(&PlannerConfig::default(), &input.coordinates()).unwrap()
    }

    fn baseline_model<'m>(
        input: &PlanningInput,
        matrices: &'m TravelMatrices,
        config: &PlannerConfig,
    ) -> RoutingModel<'m> {
        RoutingModel::new(input, &DemandScenario::baseline(&input.stores), matrices, config)
    }

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_schedule_times_and_distance() {
        let input = input(100.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        // 0.1 deg = 11.1 km = 16.65 min -> 17 min per hop at 40 km/h
        let schedule = model.schedule(0, &[1, 2]).unwrap();
        assert_eq!(schedule.times, vec![480, 497, 529, 578]);
        assert_eq!(schedule.load, 20_000);
        assert_eq!(schedule.distance, 1110 + 1110 + 2220);
    }

    #[test]
    fn test_capacity_violation_is_infeasible() {
        let input = input(15.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        assert!(model.is_feasible(0, &[1]));
        assert!(!model.is_feasible(0, &[1, 2]));
    }

    #[test]
    fn test_closed_window_is_infeasible() {
        let mut input = input(100.0);
        input.stores[1].window_end = 490;
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        // B reached directly at 480 + 34 min, after its window closes
        assert!(!model.is_feasible(0, &[2]));
    }

    #[test]
    fn test_departure_delayed_for_late_window() {
        let mut input = input(100.0);
        input.stores[0].window_start = 600;
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        let schedule = model.schedule(0, &[1]).unwrap();
        assert_eq!(schedule.times[0], 583);
        assert_eq!(schedule.times[1], 600);
    }

    #[test]
    fn test_waiting_beyond_slack_is_infeasible() {
        let mut input = input(100.0);
        // A served at 497, B reached at 529 but opens at 640
        input.stores[1].window_start = 640;
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        assert!(!model.is_feasible(0, &[1, 2]));
        assert!(model.is_feasible(0, &[2]));
    }

    #[test]
    fn test_max_route_duration() {
        let mut input = input(100.0);
        input.vehicles[0].max_route_duration_min = 30;
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        assert!(!model.is_feasible(0, &[1]));
        assert!(model.is_feasible(1, &[1]));
    }

    #[test]
    fn test_every_construction_serves_all_stores() {
        let input = input(100.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        for strategy in [
            FirstSolutionStrategy::PathCheapestArc,
            FirstSolutionStrategy::ParallelCheapestInsertion,
            FirstSolutionStrategy::Savings,
            FirstSolutionStrategy::Automatic,
        ] {
            let assignment = construct(&model, strategy, far_future());
            assert!(assignment.dropped.is_empty(), "{:?} dropped stores", strategy);
            for (vehicle, route) in assignment.routes.iter().enumerate() {
                assert!(model.is_feasible(vehicle, route));
            }
        }
    }

    #[test]
    fn test_construction_after_deadline_keeps_stores_dropped() {
        let input = input(100.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);
        let expired = Instant::now();

        for strategy in [
            FirstSolutionStrategy::PathCheapestArc,
            FirstSolutionStrategy::ParallelCheapestInsertion,
        ] {
            let assignment = construct(&model, strategy, expired);
            assert_eq!(assignment.dropped, vec![1, 2, 3], "{:?}", strategy);
            assert!(assignment.routes.iter().all(Vec::is_empty));
        }

        // Savings skips merging but still hands out single-store routes.
        let assignment = construct(&model, FirstSolutionStrategy::Savings, expired);
        let mut seen: Vec<usize> = assignment.routes.concat();
        seen.extend(&assignment.dropped);
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        for (vehicle, route) in assignment.routes.iter().enumerate() {
            assert!(model.is_feasible(vehicle, route));
        }
    }

    #[test]
    fn test_fractional_demand_never_exceeds_capacity() {
        let mut input = input(108.0);
        for store in &mut input.stores {
            store.demand = 36.3;
        }
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        assert!(model.is_feasible(0, &[1, 2]));
        // 3 * 36.3 = 108.9
        assert!(!model.is_feasible(0, &[1, 2, 3]));

        input.vehicles[0].capacity = 108.9;
        let model = baseline_model(&input, &matrices, &config);
        assert!(model.is_feasible(0, &[1, 2, 3]));
    }

    #[test]
    fn test_scaled_float_noise_still_fits() {
        // 33.0 * 1.1 is slightly above 36.3 in binary
        assert_eq!(demand_units(33.0 * 1.1), 36_300);
        assert_eq!(demand_units(36.3), 36_300);
        assert_eq!(demand_units(-4.0), 0);
        assert_eq!(capacity_units(108.9), 108_900);
    }

    #[test]
    fn test_unschedulable_route_reported_as_dropped() {
        let input = input(15.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let scenario = DemandScenario::baseline(&input.stores);
        let solver = RoutingSolver::new(&input, &matrices, &config).unwrap();
        let model = solver.model(&scenario);

        // Over capacity, so it cannot be timed.
        let assignment = Assignment::from_routes(&model, vec![vec![1, 2], vec![3]]);
        let result = solver.extract(&scenario, &model, &assignment, Duration::ZERO);

        assert_eq!(result.routes.len(), 1);
        assert_eq!(result.routes[0].store_ids, vec!["C"]);
        assert_eq!(result.dropped_nodes, vec![1, 2]);
        assert_eq!(result.dropped_store_ids, vec!["A", "B"]);
    }

    #[test]
    fn test_assignment_bookkeeping() {
        let input = input(100.0);
        let matrices = matrices(&input);
        let config = PlannerConfig::default();
        let model = baseline_model(&input, &matrices, &config);

        let mut assignment = Assignment::from_routes(&model, vec![vec![1], vec![]]);
        assert_eq!(assignment.dropped, vec![2, 3]);
        assert_eq!(assignment.objective(&model), 2220 + 2 * config.drop_penalty);

        assignment.mark_served(3);
        assignment.mark_dropped(1);
        assignment.mark_dropped(1);
        assert_eq!(assignment.dropped, vec![1, 2]);
        assert_eq!(assignment.arcs(), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_solver_rejects_mismatched_matrices() {
        let input = input(100.0);
        let other = PlanningInput::new(
            input.depot.clone(),
            input.stores[..1].to_vec(),
            input.vehicles.clone(),
        )
        .unwrap();
        let matrices = matrices(&other);
        let config = PlannerConfig::default();
        assert!(matches!(
            RoutingSolver::new(&input, &matrices, &config),
            Err(PlannerError::Matrix(MatrixError::DimensionMismatch { .. }))
        ));
    }
}
