//! Planner configuration.
//!
//! Every struct has a `Default` carrying the reference tuning and deserializes
//! with missing fields falling back to those defaults, so hosts can load a
//! partial JSON document.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// How straight-line distances between coordinates are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMode {
    /// Planar approximation at a fixed km-per-degree scale. Fast, fine for a
    /// compact metro area.
    Euclidean,
    /// Great-circle distance.
    Haversine,
}

/// Construction heuristic for the first assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum FirstSolutionStrategy {
    /// Extend each route from its last node along the cheapest feasible arc.
    PathCheapestArc,
    /// Repeatedly insert the globally cheapest (store, route, position).
    ParallelCheapestInsertion,
    /// Clarke-Wright savings merges.
    Savings,
    Automatic,
}

impl FromStr for FirstSolutionStrategy {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATH_CHEAPEST_ARC" => Ok(Self::PathCheapestArc),
            "PARALLEL_CHEAPEST_INSERTION" => Ok(Self::ParallelCheapestInsertion),
            "SAVINGS" => Ok(Self::Savings),
            "AUTOMATIC" => Ok(Self::Automatic),
            _ => Err(PlannerError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for FirstSolutionStrategy {
    type Error = PlannerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for FirstSolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::PathCheapestArc => "PATH_CHEAPEST_ARC",
                Self::ParallelCheapestInsertion => "PARALLEL_CHEAPEST_INSERTION",
                Self::Savings => "SAVINGS",
                Self::Automatic => "AUTOMATIC",
            }
        )
    }
}

/// Improvement phase run after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum LocalSearchMetaheuristic {
    /// Plain descent, stops at the first local optimum.
    GreedyDescent,
    /// Descent on an arc-penalized objective; penalties escape local optima.
    GuidedLocalSearch,
    /// Best non-tabu neighbor each iteration.
    TabuSearch,
    /// Random neighbors accepted by the Metropolis criterion.
    SimulatedAnnealing,
    Automatic,
}

impl FromStr for LocalSearchMetaheuristic {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEDY_DESCENT" => Ok(Self::GreedyDescent),
            "GUIDED_LOCAL_SEARCH" => Ok(Self::GuidedLocalSearch),
            "TABU_SEARCH" => Ok(Self::TabuSearch),
            "SIMULATED_ANNEALING" => Ok(Self::SimulatedAnnealing),
            "AUTOMATIC" => Ok(Self::Automatic),
            _ => Err(PlannerError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for LocalSearchMetaheuristic {
    type Error = PlannerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LocalSearchMetaheuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::GreedyDescent => "GREEDY_DESCENT",
                Self::GuidedLocalSearch => "GUIDED_LOCAL_SEARCH",
                Self::TabuSearch => "TABU_SEARCH",
                Self::SimulatedAnnealing => "SIMULATED_ANNEALING",
                Self::Automatic => "AUTOMATIC",
            }
        )
    }
}

/// Search knobs for a single scenario solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParameters {
    pub first_solution_strategy: FirstSolutionStrategy,
    pub local_search_metaheuristic: LocalSearchMetaheuristic,
    /// Wall-clock budget per solve, in seconds.
    pub time_limit_secs: f64,
    /// Independent search workers. 0 or 1 runs a single search.
    pub num_search_workers: usize,
    /// Stop after this many improving solutions (0 = unlimited).
    pub solution_limit: usize,
    /// Iteration cap for the improvement phase.
    pub max_iterations: usize,
    /// Emit a debug event per improving solution.
    pub log_search: bool,
    pub seed: u64,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            first_solution_strategy: FirstSolutionStrategy::PathCheapestArc,
            local_search_metaheuristic: LocalSearchMetaheuristic::GuidedLocalSearch,
            time_limit_secs: 30.0,
            num_search_workers: 0,
            solution_limit: 0,
            max_iterations: 2000,
            log_search: false,
            seed: 0,
        }
    }
}

impl SearchParameters {
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_limit_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// How a demand forecast is expanded into scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub demand_ratios: Vec<f64>,
    /// Optional weights, one per ratio.
    pub scenario_weights: Option<Vec<f64>>,
    pub monte_carlo_samples: usize,
    /// Hard cap on Monte Carlo scenarios regardless of the requested count.
    pub monte_carlo_max_samples: usize,
    pub monte_carlo_std: f64,
    /// Clip band for sampled ratios.
    pub ratio_band: (f64, f64),
    /// 0 disables the confidence-feature adjustment.
    pub feature_weight: f64,
    /// Clip band for the feature scale.
    pub feature_band: (f64, f64),
    /// Emit low/base/high scenarios from forecast bounds instead of ratios.
    pub use_confidence_bounds: bool,
    /// Seed for Monte Carlo sampling; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            demand_ratios: vec![0.9, 1.0, 1.1],
            scenario_weights: None,
            monte_carlo_samples: 0,
            monte_carlo_max_samples: 20,
            monte_carlo_std: 0.05,
            ratio_band: (0.8, 1.2),
            feature_weight: 0.15,
            feature_band: (0.8, 1.2),
            use_confidence_bounds: false,
            seed: None,
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self
            .demand_ratios
            .iter()
            .any(|ratio| !ratio.is_finite() || *ratio < 0.0)
        {
            return Err(PlannerError::InvalidConfig(
                "demand ratios must be finite and non-negative".to_string(),
            ));
        }
        if let Some(weights) = &self.scenario_weights {
            if weights.len() != self.demand_ratios.len() {
                return Err(PlannerError::InvalidConfig(format!(
                    "{} scenario weights for {} demand ratios",
                    weights.len(),
                    self.demand_ratios.len()
                )));
            }
        }
        if !self.monte_carlo_std.is_finite() || self.monte_carlo_std < 0.0 {
            return Err(PlannerError::InvalidConfig(format!(
                "monte_carlo_std must be finite and non-negative, got {}",
                self.monte_carlo_std
            )));
        }
        let bands = [
            ("ratio_band", self.ratio_band),
            ("feature_band", self.feature_band),
        ];
        for (name, (low, high)) in bands {
            if !(low.is_finite() && high.is_finite() && low <= high && low >= 0.0) {
                return Err(PlannerError::InvalidConfig(format!(
                    "{name} must be an ordered non-negative range, got ({low}, {high})"
                )));
            }
        }
        Ok(())
    }
}

/// Top-level configuration for a planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub distance_mode: DistanceMode,
    pub average_speed_kmh: f64,
    /// Integer scale applied to kilometers for the search (100 = 10 m precision).
    pub distance_scale: i64,
    /// Fixed service time per store stop.
    pub service_time_min: i64,
    /// Longest a vehicle may wait at a store for its window to open.
    pub max_wait_min: i64,
    /// Objective penalty for leaving a store unserved, in scaled distance units.
    pub drop_penalty: i64,
    /// Stops served within this many minutes of their window closing count as at risk.
    pub sla_margin_min: i64,
    pub search: SearchParameters,
    pub scenarios: ScenarioConfig,
    /// `min_max_distance`, `min_avg_distance`, `min_sla_violation`, ...
    pub selection_criterion: String,
    /// Cap on concurrently solved scenarios; available cores when unset.
    pub max_parallel_scenarios: Option<usize>,
    /// Deadline for the whole ensemble, in seconds.
    pub ensemble_timeout_secs: Option<f64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            distance_mode: DistanceMode::Euclidean,
            average_speed_kmh: 40.0,
            distance_scale: 100,
            service_time_min: 15,
            max_wait_min: 30,
            drop_penalty: 1_000_000,
            sla_margin_min: 30,
            search: SearchParameters::default(),
            scenarios: ScenarioConfig::default(),
            selection_criterion: "min_max_distance".to_string(),
            max_parallel_scenarios: None,
            ensemble_timeout_secs: None,
        }
    }
}

impl PlannerConfig {
    /// Strategy names are checked first, so an unknown one surfaces as
    /// [`PlannerError::UnknownStrategy`] rather than a generic parse error.
    pub fn from_json(json: &str) -> Result<Self, PlannerError> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(invalid_json)?;
        if let Some(search) = value.get("search") {
            let name = |key: &str| search.get(key).and_then(serde_json::Value::as_str);
            if let Some(strategy) = name("first_solution_strategy") {
                strategy.parse::<FirstSolutionStrategy>()?;
            }
            if let Some(metaheuristic) = name("local_search_metaheuristic") {
                metaheuristic.parse::<LocalSearchMetaheuristic>()?;
            }
        }

        let config: Self = serde_json::from_value(value).map_err(invalid_json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if !self.average_speed_kmh.is_finite() || self.average_speed_kmh <= 0.0 {
            return Err(PlannerError::InvalidConfig(format!(
                "average_speed_kmh must be positive, got {}",
                self.average_speed_kmh
            )));
        }
        if self.distance_scale < 1 {
            return Err(PlannerError::InvalidConfig(format!(
                "distance_scale must be at least 1, got {}",
                self.distance_scale
            )));
        }
        if self.service_time_min < 0 || self.max_wait_min < 0 || self.drop_penalty < 0 {
            return Err(PlannerError::InvalidConfig(
                "service time, waiting slack and drop penalty must be non-negative".to_string(),
            ));
        }
        if !self.search.time_limit_secs.is_finite() || self.search.time_limit_secs < 0.0 {
            return Err(PlannerError::InvalidConfig(format!(
                "time_limit_secs must be finite and non-negative, got {}",
                self.search.time_limit_secs
            )));
        }
        if let Some(secs) = self.ensemble_timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(PlannerError::InvalidConfig(format!(
                    "ensemble_timeout_secs must be finite and non-negative, got {}",
                    secs
                )));
            }
        }
        if self.max_parallel_scenarios == Some(0) {
            return Err(PlannerError::InvalidConfig(
                "max_parallel_scenarios must be at least 1".to_string(),
            ));
        }
        self.scenarios.validate()
    }

    pub fn ensemble_timeout(&self) -> Option<Duration> {
        self.ensemble_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs.max(0.0)).ok())
    }
}

fn invalid_json(err: serde_json::Error) -> PlannerError {
    PlannerError::InvalidConfig(err.to_string())
}
