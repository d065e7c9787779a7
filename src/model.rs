//! Planning data model.
//!
//! Locations, vehicles and forecasts are inputs built once per planning cycle
//! and never mutated by a solve. Route and scenario results are plain outputs
//! owned by the caller.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// The depot is always node 0 in any matrix or model built from a location list.
pub const DEPOT_INDEX: usize = 0;

/// A depot or store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// Window start (minutes since midnight).
    pub window_start: i64,
    /// Window end (minutes since midnight).
    pub window_end: i64,
    /// Baseline demand. Always 0 for the depot.
    pub demand: f64,
}

impl Location {
    pub fn depot(id: impl Into<String>, lat: f64, lng: f64, open: i64, close: i64) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            window_start: open,
            window_end: close,
            demand: 0.0,
        }
    }

    pub fn store(
        id: impl Into<String>,
        lat: f64,
        lng: f64,
        window: (i64, i64),
        demand: f64,
    ) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            window_start: window.0,
            window_end: window.1,
            demand,
        }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    fn validate(&self) -> Result<(), PlannerError> {
        let valid = self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0;
        if !valid {
            return Err(PlannerError::InvalidCoordinates {
                id: self.id.clone(),
                lat: self.lat,
                lng: self.lng,
            });
        }
        if self.window_start > self.window_end {
            return Err(PlannerError::InvalidTimeWindow {
                id: self.id.clone(),
                value: format!(
                    "{}-{}",
                    format_hhmm(self.window_start),
                    format_hhmm(self.window_end)
                ),
            });
        }
        if !self.demand.is_finite() || self.demand < 0.0 {
            return Err(PlannerError::InvalidDemand {
                id: self.id.clone(),
                demand: self.demand,
            });
        }
        Ok(())
    }
}

/// A delivery vehicle. Vehicles are interchangeable apart from capacity,
/// cost and maximum route duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub id: String,
    pub capacity: f64,
    pub cost_per_km: f64,
    pub max_route_duration_min: i64,
}

impl VehicleSpec {
    pub fn new(id: impl Into<String>, capacity: f64) -> Self {
        Self {
            id: id.into(),
            capacity,
            cost_per_km: 1.0,
            max_route_duration_min: 24 * 60,
        }
    }

    pub fn cost_per_km(mut self, cost: f64) -> Self {
        self.cost_per_km = cost;
        self
    }

    pub fn max_route_duration(mut self, minutes: i64) -> Self {
        self.max_route_duration_min = minutes;
        self
    }
}

/// Store master data as delivered by the upstream store registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// `HH:MM`
    pub time_window_start: String,
    /// `HH:MM`
    pub time_window_end: String,
}

/// Low/mid/high demand quantiles for one store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileDemand {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

/// One store's demand forecast for a planning date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub store_id: String,
    pub date: String,
    pub forecast_demand: f64,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default)]
    pub quantiles: Option<QuantileDemand>,
    /// Forecast confidence feature in [0, 1].
    #[serde(default)]
    pub feature_score: Option<f64>,
}

/// Baseline demand of one store, the input to scenario generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDemand {
    pub store_id: String,
    pub demand: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub quantiles: Option<QuantileDemand>,
    pub feature_score: Option<f64>,
}

impl StoreDemand {
    pub fn new(store_id: impl Into<String>, demand: f64) -> Self {
        Self {
            store_id: store_id.into(),
            demand,
            lower_bound: None,
            upper_bound: None,
            quantiles: None,
            feature_score: None,
        }
    }

    pub fn bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self
    }

    pub fn quantiles(mut self, low: f64, mid: f64, high: f64) -> Self {
        self.quantiles = Some(QuantileDemand { low, mid, high });
        self
    }

    pub fn feature(mut self, score: f64) -> Self {
        self.feature_score = Some(score);
        self
    }
}

impl From<&DemandForecast> for StoreDemand {
    fn from(forecast: &DemandForecast) -> Self {
        Self {
            store_id: forecast.store_id.clone(),
            demand: forecast.forecast_demand,
            lower_bound: forecast.lower_bound,
            upper_bound: forecast.upper_bound,
            quantiles: forecast.quantiles,
            feature_score: forecast.feature_score,
        }
    }
}

/// A named demand variant of the base instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandScenario {
    pub id: String,
    /// Demand per store id. Never negative.
    pub demands: BTreeMap<String, f64>,
    /// Scale relative to the baseline, when the scenario is ratio-derived.
    pub ratio: Option<f64>,
    /// Reporting-only weight or probability.
    pub weight: Option<f64>,
}

impl DemandScenario {
    /// The scenario that uses each store's own baseline demand.
    pub fn baseline(stores: &[Location]) -> Self {
        Self {
            id: "baseline".to_string(),
            demands: stores
                .iter()
                .map(|store| (store.id.clone(), store.demand))
                .collect(),
            ratio: Some(1.0),
            weight: None,
        }
    }

    pub fn total_demand(&self) -> f64 {
        self.demands.values().sum()
    }

    /// Demand for a store, falling back to its baseline when the scenario
    /// carries no override.
    pub fn demand_for(&self, store: &Location) -> f64 {
        self.demands
            .get(&store.id)
            .copied()
            .unwrap_or(store.demand)
            .max(0.0)
    }
}

/// A validated routing instance: depot, stores and fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningInput {
    pub depot: Location,
    pub stores: Vec<Location>,
    pub vehicles: Vec<VehicleSpec>,
}

impl PlanningInput {
    pub fn new(
        depot: Location,
        stores: Vec<Location>,
        vehicles: Vec<VehicleSpec>,
    ) -> Result<Self, PlannerError> {
        let input = Self {
            depot: Location {
                demand: 0.0,
                ..depot
            },
            stores,
            vehicles,
        };
        input.validate()?;
        Ok(input)
    }

    /// Builds locations from store master data and the forecast for the
    /// planning date. Stores without a forecast get zero demand.
    pub fn from_master_data(
        depot: Location,
        stores: &[StoreInfo],
        forecasts: &[DemandForecast],
        vehicles: Vec<VehicleSpec>,
    ) -> Result<(Self, Vec<StoreDemand>), PlannerError> {
        let by_store: HashMap<&str, &DemandForecast> = forecasts
            .iter()
            .map(|forecast| (forecast.store_id.as_str(), forecast))
            .collect();

        let mut locations = Vec::with_capacity(stores.len());
        let mut baseline = Vec::with_capacity(stores.len());
        for store in stores {
            let start = parse_window_bound(&store.store_id, &store.time_window_start)?;
            let end = parse_window_bound(&store.store_id, &store.time_window_end)?;
            let demand = match by_store.get(store.store_id.as_str()) {
                Some(forecast) => StoreDemand::from(*forecast),
                None => StoreDemand::new(store.store_id.clone(), 0.0),
            };
            locations.push(Location::store(
                store.store_id.clone(),
                store.latitude,
                store.longitude,
                (start, end),
                demand.demand,
            ));
            baseline.push(demand);
        }

        let input = Self::new(depot, locations, vehicles)?;
        Ok((input, baseline))
    }

    /// Depot first, then stores in input order.
    pub fn locations(&self) -> Vec<&Location> {
        std::iter::once(&self.depot).chain(self.stores.iter()).collect()
    }

    pub fn coordinates(&self) -> Vec<(f64, f64)> {
        self.locations().iter().map(|location| location.coords()).collect()
    }

    /// Baseline demand per store, in store order.
    pub fn baseline_demand(&self) -> Vec<StoreDemand> {
        self.stores
            .iter()
            .map(|store| StoreDemand::new(store.id.clone(), store.demand))
            .collect()
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.stores.is_empty() {
            return Err(PlannerError::EmptyStores);
        }
        if self.vehicles.is_empty() {
            return Err(PlannerError::EmptyVehicles);
        }
        self.depot.validate()?;
        for store in &self.stores {
            store.validate()?;
        }
        for vehicle in &self.vehicles {
            if !vehicle.capacity.is_finite() || vehicle.capacity <= 0.0 {
                return Err(PlannerError::InvalidCapacity {
                    vehicle_id: vehicle.id.clone(),
                    capacity: vehicle.capacity,
                });
            }
        }
        Ok(())
    }
}

/// One vehicle's route in a solved scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSolution {
    pub vehicle_id: String,
    /// Node indices, starting and ending at the depot.
    pub sequence: Vec<usize>,
    /// Store ids of the non-depot nodes, in visiting order.
    pub store_ids: Vec<String>,
    /// Service start per node of `sequence` (minutes since midnight).
    pub arrival_times: Vec<i64>,
    /// Departure per node of `sequence` (minutes since midnight).
    pub departure_times: Vec<i64>,
    /// Distance of each leg, `sequence.len() - 1` entries.
    pub leg_distances_km: Vec<f64>,
    pub distance_km: f64,
    pub duration_min: i64,
    /// Cumulative demand delivered on the route.
    pub load: f64,
    pub capacity: f64,
    pub cost: f64,
    pub sla_risk_score: f64,
}

impl RouteSolution {
    pub fn stop_count(&self) -> usize {
        self.store_ids.len()
    }
}

/// All routes of one scenario solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub ratio: Option<f64>,
    pub weight: Option<f64>,
    /// Non-empty routes only.
    pub routes: Vec<RouteSolution>,
    /// Node indices of stores left unserved.
    pub dropped_nodes: Vec<usize>,
    pub dropped_store_ids: Vec<String>,
    /// Number of stores that were candidates for service.
    pub candidate_count: usize,
    /// Objective in scaled units: arc costs plus drop penalties.
    pub objective: i64,
    pub solve_time: Duration,
}

impl ScenarioResult {
    pub fn total_distance_km(&self) -> f64 {
        self.routes.iter().map(|route| route.distance_km).sum()
    }

    /// Longest single route, 0 when nothing is routed.
    pub fn worst_route_distance_km(&self) -> f64 {
        self.routes
            .iter()
            .map(|route| route.distance_km)
            .fold(0.0, f64::max)
    }

    pub fn max_route_cost(&self) -> f64 {
        self.routes.iter().map(|route| route.cost).fold(0.0, f64::max)
    }

    pub fn total_cost(&self) -> f64 {
        self.routes.iter().map(|route| route.cost).sum()
    }

    pub fn total_duration_min(&self) -> i64 {
        self.routes.iter().map(|route| route.duration_min).sum()
    }

    pub fn vehicles_used(&self) -> usize {
        self.routes.len()
    }

    /// Dropped stores over candidate stores, 0 when there are no candidates.
    pub fn sla_risk_score(&self) -> f64 {
        if self.candidate_count == 0 {
            0.0
        } else {
            self.dropped_nodes.len() as f64 / self.candidate_count as f64
        }
    }
}

/// Parses `HH:MM` into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Option<i64> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if !(0..=24).contains(&hours) || !(0..60).contains(&minutes) || (hours == 24 && minutes > 0) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Formats minutes since midnight as `HH:MM`. Hours past midnight keep counting.
pub fn format_hhmm(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn parse_window_bound(id: &str, value: &str) -> Result<i64, PlannerError> {
    parse_hhmm(value).ok_or_else(|| PlannerError::InvalidTimeWindow {
        id: id.to_string(),
        value: value.to_string(),
    })
}
