//! Stable output schema for downstream consumers.
//!
//! Distances are reported in kilometers, times as `HH:MM`. Route arrival and
//! departure lists align with `store_sequence`; `distances_km` has one entry
//! per leg, the return to the depot included, so it sums to the route total.

use serde::Serialize;

use crate::model::{format_hhmm, RouteSolution, ScenarioResult};
use crate::robust::RobustPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationType {
    Standard,
    Robust,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOutput {
    pub vehicle_id: String,
    pub store_sequence: Vec<String>,
    pub arrival_times: Vec<String>,
    pub departure_times: Vec<String>,
    pub distances_km: Vec<f64>,
    pub total_distance_km: f64,
    pub total_duration_min: i64,
    pub total_cost: f64,
    pub sla_risk_score: f64,
}

impl From<&RouteSolution> for RouteOutput {
    fn from(route: &RouteSolution) -> Self {
        // Stores sit between the depot start and the depot return.
        let stops = |times: &[i64]| -> Vec<String> {
            times
                .iter()
                .skip(1)
                .take(route.store_ids.len())
                .map(|&t| format_hhmm(t))
                .collect()
        };
        Self {
            vehicle_id: route.vehicle_id.clone(),
            store_sequence: route.store_ids.clone(),
            arrival_times: stops(&route.arrival_times),
            departure_times: stops(&route.departure_times),
            distances_km: route.leg_distances_km.clone(),
            total_distance_km: route.distance_km,
            total_duration_min: route.duration_min,
            total_cost: route.cost,
            sla_risk_score: route.sla_risk_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsOutput {
    pub min_distance: f64,
    pub max_distance: f64,
    pub avg_distance: f64,
    pub std_distance: f64,
    pub total_scenarios: usize,
}

/// One row of the robust scenario comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSummary {
    pub scenario_id: String,
    pub ratio: Option<f64>,
    pub weight: Option<f64>,
    pub total_distance_km: f64,
    pub worst_route_km: f64,
    pub vehicles_used: usize,
    pub dropped_count: usize,
    pub sla_risk_score: f64,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutput {
    pub routes: Vec<RouteOutput>,
    pub total_distance_km: f64,
    pub total_time_min: i64,
    pub total_cost: f64,
    pub vehicles_used: usize,
    pub dropped_nodes: Vec<String>,
    pub sla_risk_score: f64,
    pub scenario_id: String,
    pub computation_time_sec: f64,
    pub optimization_type: OptimizationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_criterion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_case_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<StatisticsOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_comparison: Option<Vec<ScenarioSummary>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_scenarios: Vec<String>,
}

impl PlanOutput {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Formats a single-scenario solve.
pub fn format_standard(result: &ScenarioResult) -> PlanOutput {
    PlanOutput {
        routes: result.routes.iter().map(RouteOutput::from).collect(),
        total_distance_km: result.total_distance_km(),
        total_time_min: result.total_duration_min(),
        total_cost: result.total_cost(),
        vehicles_used: result.vehicles_used(),
        dropped_nodes: result.dropped_store_ids.clone(),
        sla_risk_score: result.sla_risk_score(),
        scenario_id: result.scenario_id.clone(),
        computation_time_sec: result.solve_time.as_secs_f64(),
        optimization_type: OptimizationType::Standard,
        selection_criterion: None,
        worst_case_distance_km: None,
        statistics: None,
        scenario_comparison: None,
        failed_scenarios: Vec::new(),
    }
}

/// Formats the selected plan of a robust run, with ensemble statistics.
pub fn format_robust(plan: &RobustPlan) -> PlanOutput {
    let stats = &plan.statistics;
    let comparison = plan
        .ensemble
        .iter()
        .enumerate()
        .map(|(index, result)| ScenarioSummary {
            scenario_id: result.scenario_id.clone(),
            ratio: result.ratio,
            weight: result.weight,
            total_distance_km: result.total_distance_km(),
            worst_route_km: result.worst_route_distance_km(),
            vehicles_used: result.vehicles_used(),
            dropped_count: result.dropped_nodes.len(),
            sla_risk_score: result.sla_risk_score(),
            selected: index == plan.selected,
        })
        .collect();

    let failed_scenarios = plan.failed.iter().chain(&plan.skipped).cloned().collect();

    PlanOutput {
        optimization_type: OptimizationType::Robust,
        computation_time_sec: stats.computation_time.as_secs_f64(),
        selection_criterion: Some(plan.criterion.to_string()),
        worst_case_distance_km: Some(stats.worst_case_distance),
        statistics: Some(StatisticsOutput {
            min_distance: stats.min_distance,
            max_distance: stats.max_distance,
            avg_distance: stats.avg_distance,
            std_distance: stats.std_distance,
            total_scenarios: stats.total_scenarios,
        }),
        scenario_comparison: Some(comparison),
        failed_scenarios,
        ..format_standard(plan.selected())
    }
}

/// Aggregate metrics over a set of formatted routes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMetrics {
    pub total_distance_km: f64,
    pub total_cost: f64,
    pub num_routes: usize,
    pub avg_stops_per_route: f64,
    pub sla_risk_average: f64,
}

pub fn evaluate_routes(routes: &[RouteOutput]) -> RouteMetrics {
    let count = routes.len();
    let per_route = |total: f64| if count == 0 { 0.0 } else { total / count as f64 };
    RouteMetrics {
        total_distance_km: routes.iter().map(|r| r.total_distance_km).sum(),
        total_cost: routes.iter().map(|r| r.total_cost).sum(),
        num_routes: count,
        avg_stops_per_route: per_route(routes.iter().map(|r| r.store_sequence.len() as f64).sum()),
        sla_risk_average: per_route(routes.iter().map(|r| r.sla_risk_score).sum()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn route() -> RouteSolution {
        RouteSolution {
            vehicle_id: "V1".to_string(),
            sequence: vec![0, 2, 1, 0],
            store_ids: vec!["M002".to_string(), "M001".to_string()],
            arrival_times: vec![480, 497, 529, 578],
            departure_times: vec![480, 512, 544, 578],
            leg_distances_km: vec![11.1, 11.1, 22.2],
            distance_km: 44.4,
            duration_min: 98,
            load: 20.0,
            capacity: 100.0,
            cost: 88.8,
            sla_risk_score: 0.5,
        }
    }

    fn result() -> ScenarioResult {
        ScenarioResult {
            scenario_id: "baseline".to_string(),
            ratio: Some(1.0),
            weight: None,
            routes: vec![route()],
            dropped_nodes: vec![3],
            dropped_store_ids: vec!["M003".to_string()],
            candidate_count: 3,
            objective: 0,
            solve_time: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_route_times_align_with_stores() {
        let output = RouteOutput::from(&route());
        assert_eq!(output.store_sequence, vec!["M002", "M001"]);
        assert_eq!(output.arrival_times, vec!["08:17", "08:49"]);
        assert_eq!(output.departure_times, vec!["08:32", "09:04"]);
        assert_eq!(output.distances_km.len(), 3);
    }

    #[test]
    fn test_standard_output() {
        let output = format_standard(&result());
        assert_eq!(output.optimization_type, OptimizationType::Standard);
        assert_eq!(output.dropped_nodes, vec!["M003"]);
        assert!((output.sla_risk_score - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(output.total_time_min, 98);
        assert_eq!(output.computation_time_sec, 0.25);

        let json: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
        assert_eq!(json["optimization_type"], "standard");
        assert!(json.get("statistics").is_none());
        assert!(json.get("selection_criterion").is_none());
    }

    #[test]
    fn test_evaluate_routes() {
        let routes = vec![RouteOutput::from(&route()), RouteOutput::from(&route())];
        let metrics = evaluate_routes(&routes);
        assert_eq!(metrics.num_routes, 2);
        assert!((metrics.total_distance_km - 88.8).abs() < 1e-9);
        assert_eq!(metrics.avg_stops_per_route, 2.0);
        assert_eq!(metrics.sla_risk_average, 0.5);

        let empty = evaluate_routes(&[]);
        assert_eq!(empty.num_routes, 0);
        assert_eq!(empty.avg_stops_per_route, 0.0);
    }
}
