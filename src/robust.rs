//! Robust optimization over a demand scenario ensemble.
//!
//! Every scenario is solved independently (in parallel, up to the configured
//! cap), failed scenarios are excluded, and one surviving scenario's plan is
//! selected for execution by a [`SelectionCriterion`].

use std::fmt;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::matrix::build_for_config;
use crate::model::{DemandScenario, PlanningInput, ScenarioResult, StoreDemand};
use crate::scenario::ScenarioGenerator;
use crate::solver::RoutingSolver;
use crate::traits::ScenarioSolver;

/// Policy choosing which scenario's plan gets executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    /// Smallest single worst route distance.
    MinMaxDistance,
    /// Smallest total distance.
    MinAvgDistance,
    /// Fewest dropped stores, then smallest total distance.
    MinSlaViolation,
    /// Smallest single worst route cost.
    MinMaxCost,
    /// Ratio closest to 1.0, else the median scenario.
    Nominal,
}

impl SelectionCriterion {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "min_max_distance" => Some(Self::MinMaxDistance),
            "min_avg_distance" | "min_expected_distance" => Some(Self::MinAvgDistance),
            "min_sla_violation" => Some(Self::MinSlaViolation),
            "min_max_cost" => Some(Self::MinMaxCost),
            "nominal" => Some(Self::Nominal),
            _ => None,
        }
    }

    /// Like [`parse`](Self::parse), but an unknown name falls back to
    /// [`Nominal`](Self::Nominal) with a warning.
    pub fn from_name_or_nominal(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            warn!(criterion = name, "Unknown selection criterion, using nominal scenario");
            Self::Nominal
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinMaxDistance => "min_max_distance",
            Self::MinAvgDistance => "min_avg_distance",
            Self::MinSlaViolation => "min_sla_violation",
            Self::MinMaxCost => "min_max_cost",
            Self::Nominal => "nominal",
        }
    }
}

impl fmt::Display for SelectionCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of the selected scenario; `None` only for an empty ensemble.
/// Ties go to the earliest-generated scenario.
pub fn select(results: &[ScenarioResult], criterion: SelectionCriterion) -> Option<usize> {
    match criterion {
        SelectionCriterion::MinMaxDistance => {
            argmin(results, |r| (r.worst_route_distance_km(), 0.0))
        }
        SelectionCriterion::MinAvgDistance => argmin(results, |r| (r.total_distance_km(), 0.0)),
        SelectionCriterion::MinSlaViolation => {
            argmin(results, |r| (r.dropped_nodes.len() as f64, r.total_distance_km()))
        }
        SelectionCriterion::MinMaxCost => argmin(results, |r| (r.max_route_cost(), 0.0)),
        SelectionCriterion::Nominal => select_nominal(results),
    }
}

fn argmin(
    results: &[ScenarioResult],
    key: impl Fn(&ScenarioResult) -> (f64, f64),
) -> Option<usize> {
    let mut best: Option<(usize, (f64, f64))> = None;
    for (index, result) in results.iter().enumerate() {
        let value = key(result);
        if best.is_none_or(|(_, current)| value < current) {
            best = Some((index, value));
        }
    }
    best.map(|(index, _)| index)
}

fn select_nominal(results: &[ScenarioResult]) -> Option<usize> {
    if results.is_empty() {
        return None;
    }
    let closest = results
        .iter()
        .enumerate()
        .filter_map(|(index, result)| result.ratio.map(|ratio| (index, (ratio - 1.0).abs())))
        .fold(None, |best: Option<(usize, f64)>, (index, gap)| match best {
            Some((_, best_gap)) if best_gap <= gap => best,
            _ => Some((index, gap)),
        });
    Some(closest.map_or(results.len() / 2, |(index, _)| index))
}

// ============================================================================
// Ensemble
// ============================================================================

#[derive(Debug, Clone)]
pub enum ScenarioOutcome {
    Solved(ScenarioResult),
    /// The solver found no assignment within its budget.
    Failed { scenario_id: String },
    /// Not started before the ensemble deadline.
    Skipped { scenario_id: String },
}

/// Total-distance statistics over the surviving scenarios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleStatistics {
    pub min_distance: f64,
    pub max_distance: f64,
    pub avg_distance: f64,
    /// Population standard deviation.
    pub std_distance: f64,
    pub worst_case_distance: f64,
    /// Scenarios that produced a plan.
    pub total_scenarios: usize,
    pub attempted_scenarios: usize,
    #[serde(skip)]
    pub computation_time: Duration,
}

impl EnsembleStatistics {
    pub fn from_results(
        results: &[ScenarioResult],
        attempted: usize,
        computation_time: Duration,
    ) -> Self {
        let distances: Vec<f64> = results.iter().map(ScenarioResult::total_distance_km).collect();
        let count = distances.len().max(1) as f64;
        let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
        let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = distances.iter().sum::<f64>() / count;
        let variance = distances.iter().map(|d| (d - avg).powi(2)).sum::<f64>() / count;

        let (min, max) = if distances.is_empty() { (0.0, 0.0) } else { (min, max) };
        Self {
            min_distance: min,
            max_distance: max,
            avg_distance: avg,
            std_distance: variance.sqrt(),
            worst_case_distance: max,
            total_scenarios: distances.len(),
            attempted_scenarios: attempted,
            computation_time,
        }
    }
}

/// The selected plan plus the ensemble it was chosen from.
#[derive(Debug, Clone)]
pub struct RobustPlan {
    /// Index into `ensemble`.
    pub selected: usize,
    pub ensemble: Vec<ScenarioResult>,
    pub criterion: SelectionCriterion,
    pub statistics: EnsembleStatistics,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl RobustPlan {
    pub fn selected(&self) -> &ScenarioResult {
        &self.ensemble[self.selected]
    }
}

/// Solves scenario ensembles with any [`ScenarioSolver`].
pub struct RobustOptimizer<'a, S: ScenarioSolver> {
    solver: &'a S,
    config: &'a PlannerConfig,
    criterion: SelectionCriterion,
}

impl<'a, S: ScenarioSolver> RobustOptimizer<'a, S> {
    pub fn new(solver: &'a S, config: &'a PlannerConfig) -> Self {
        Self {
            solver,
            config,
            criterion: SelectionCriterion::from_name_or_nominal(&config.selection_criterion),
        }
    }

    pub fn criterion(&self) -> SelectionCriterion {
        self.criterion
    }

    /// Solves every scenario; outcomes keep the input order.
    pub fn solve_ensemble(
        &self,
        scenarios: &[DemandScenario],
    ) -> Result<Vec<ScenarioOutcome>, PlannerError> {
        let now = Instant::now();
        let deadline = self
            .config
            .ensemble_timeout()
            .and_then(|timeout| now.checked_add(timeout));
        let workers = worker_count(self.config.max_parallel_scenarios, scenarios.len());

        if workers <= 1 {
            return Ok(scenarios
                .iter()
                .map(|scenario| self.solve_one(scenario, deadline))
                .collect());
        }

        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        Ok(pool.install(|| {
            scenarios
                .par_iter()
                .map(|scenario| self.solve_one(scenario, deadline))
                .collect()
        }))
    }

    fn solve_one(&self, scenario: &DemandScenario, deadline: Option<Instant>) -> ScenarioOutcome {
        let mut budget = self.config.search.time_limit();
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(scenario = %scenario.id, "Ensemble deadline passed, skipping scenario");
                return ScenarioOutcome::Skipped {
                    scenario_id: scenario.id.clone(),
                };
            }
            budget = budget.min(remaining);
        }

        match self.solver.solve_scenario(scenario, Some(budget)) {
            Some(result) => ScenarioOutcome::Solved(result),
            None => {
                warn!(
                    scenario = %scenario.id,
                    "Scenario has no solution, excluding it from the ensemble"
                );
                ScenarioOutcome::Failed {
                    scenario_id: scenario.id.clone(),
                }
            }
        }
    }

    /// Solves the ensemble and selects one plan.
    ///
    /// Fails with [`PlannerError::AllScenariosFailed`] when no scenario
    /// produced a plan.
    pub fn optimize(&self, scenarios: &[DemandScenario]) -> Result<RobustPlan, PlannerError> {
        let started = Instant::now();
        info!(
            scenarios = scenarios.len(),
            criterion = %self.criterion,
            "Starting robust optimization"
        );

        let mut ensemble = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        for outcome in self.solve_ensemble(scenarios)? {
            match outcome {
                ScenarioOutcome::Solved(result) => ensemble.push(result),
                ScenarioOutcome::Failed { scenario_id } => failed.push(scenario_id),
                ScenarioOutcome::Skipped { scenario_id } => skipped.push(scenario_id),
            }
        }

        let Some(selected) = select(&ensemble, self.criterion) else {
            return Err(PlannerError::AllScenariosFailed {
                attempted: scenarios.len(),
            });
        };
        let statistics =
            EnsembleStatistics::from_results(&ensemble, scenarios.len(), started.elapsed());

        info!(
            selected = %ensemble[selected].scenario_id,
            solved = ensemble.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            worst_case_km = statistics.worst_case_distance,
            "Robust optimization finished"
        );

        Ok(RobustPlan {
            selected,
            ensemble,
            criterion: self.criterion,
            statistics,
            failed,
            skipped,
        })
    }
}

/// Scenario workers: the caller's cap, never more than the available cores
/// or the number of scenarios.
fn worker_count(cap: Option<usize>, scenarios: usize) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    cap.map_or(cores, |cap| cap.min(cores)).min(scenarios).max(1)
}

/// Generates the ensemble from `baseline` (or the stores' own demand when
/// empty), builds matrices, and runs the robust optimizer end to end.
pub fn plan_robust(
    input: &PlanningInput,
    baseline: &[StoreDemand],
    config: &PlannerConfig,
) -> Result<RobustPlan, PlannerError> {
    let generator = ScenarioGenerator::new(config.scenarios.clone())?;
    let scenarios = if baseline.is_empty() {
        generator.generate(&input.baseline_demand())
    } else {
        generator.generate(baseline)
    };

    let matrices = build_for_config(config, &input.coordinates())?;
    let solver = RoutingSolver::new(input, &matrices, config)?;
    RobustOptimizer::new(&solver, config).optimize(&scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RouteSolution;

    fn route(distance_km: f64, cost_per_km: f64) -> RouteSolution {
        RouteSolution {
            vehicle_id: "V".to_string(),
            sequence: vec![0, 1, 0],
            store_ids: vec!["S".to_string()],
            arrival_times: vec![480, 500, 520],
            departure_times: vec![480, 515, 520],
            leg_distances_km: vec![distance_km / 2.0, distance_km / 2.0],
            distance_km,
            duration_min: 40,
            load: 10.0,
            capacity: 100.0,
            cost: distance_km * cost_per_km,
            sla_risk_score: 0.0,
        }
    }

    fn result(id: &str, ratio: Option<f64>, routes: &[f64], dropped: usize) -> ScenarioResult {
        ScenarioResult {
            scenario_id: id.to_string(),
            ratio,
            weight: None,
            routes: routes.iter().map(|&d| route(d, 1.0)).collect(),
            dropped_nodes: (1..=dropped).collect(),
            dropped_store_ids: Vec::new(),
            candidate_count: 5,
            objective: 0,
            solve_time: Duration::ZERO,
        }
    }

    #[test]
    fn test_min_avg_distance_uses_total() {
        let results = vec![
            result("a", None, &[10.0, 10.0], 0),
            result("b", None, &[15.0], 0),
        ];
        assert_eq!(select(&results, SelectionCriterion::MinAvgDistance), Some(1));
        assert_eq!(select(&results, SelectionCriterion::MinMaxDistance), Some(0));
    }

    #[test]
    fn test_min_sla_violation_breaks_ties_by_distance() {
        let results = vec![
            result("a", None, &[5.0], 1),
            result("b", None, &[20.0], 0),
            result("c", None, &[12.0], 0),
        ];
        assert_eq!(select(&results, SelectionCriterion::MinSlaViolation), Some(2));
    }

    #[test]
    fn test_ties_go_to_first_generated() {
        let results = vec![
            result("a", None, &[7.0], 0),
            result("b", None, &[7.0], 0),
        ];
        for criterion in [
            SelectionCriterion::MinMaxDistance,
            SelectionCriterion::MinAvgDistance,
            SelectionCriterion::MinSlaViolation,
            SelectionCriterion::MinMaxCost,
        ] {
            assert_eq!(select(&results, criterion), Some(0));
        }
    }

    #[test]
    fn test_min_max_cost() {
        let mut results = vec![
            result("a", None, &[10.0], 0),
            result("b", None, &[8.0], 0),
        ];
        results[1].routes[0].cost = 8.0 * 2.0;
        assert_eq!(select(&results, SelectionCriterion::MinMaxCost), Some(0));
    }

    #[test]
    fn test_nominal_prefers_ratio_one() {
        let results = vec![
            result("ratio_0.90", Some(0.9), &[9.0], 0),
            result("ratio_1.00", Some(1.0), &[10.0], 0),
            result("ratio_1.10", Some(1.1), &[11.0], 0),
        ];
        assert_eq!(select(&results, SelectionCriterion::Nominal), Some(1));
    }

    #[test]
    fn test_nominal_without_ratios_takes_median() {
        let results = vec![
            result("quantile_low", None, &[9.0], 0),
            result("quantile_mid", None, &[10.0], 0),
            result("quantile_high", None, &[11.0], 0),
            result("extra", None, &[12.0], 0),
        ];
        assert_eq!(select(&results, SelectionCriterion::Nominal), Some(2));
        assert_eq!(select(&[], SelectionCriterion::Nominal), None);
    }

    #[test]
    fn test_criterion_names() {
        assert_eq!(
            SelectionCriterion::parse("min_expected_distance"),
            Some(SelectionCriterion::MinAvgDistance)
        );
        assert_eq!(SelectionCriterion::parse("cheapest"), None);
        assert_eq!(
            SelectionCriterion::from_name_or_nominal("cheapest"),
            SelectionCriterion::Nominal
        );
        assert_eq!(SelectionCriterion::MinMaxCost.to_string(), "min_max_cost");
    }

    #[test]
    fn test_statistics() {
        let results = vec![
            result("a", None, &[10.0], 0),
            result("b", None, &[20.0], 0),
            result("c", None, &[30.0], 0),
        ];
        let stats = EnsembleStatistics::from_results(&results, 4, Duration::ZERO);
        assert_eq!(stats.min_distance, 10.0);
        assert_eq!(stats.max_distance, 30.0);
        assert_eq!(stats.worst_case_distance, 30.0);
        assert_eq!(stats.avg_distance, 20.0);
        assert!((stats.std_distance - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(stats.total_scenarios, 3);
        assert_eq!(stats.attempted_scenarios, 4);
    }

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(Some(1), 10), 1);
        assert_eq!(worker_count(None, 0), 1);
        assert!(worker_count(Some(64), 3) <= 3);
    }
}
