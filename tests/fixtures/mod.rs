//! Test fixtures for robust-route-planner.
//!
//! Provides:
//! - Hong Kong store sites
//! - Builders for stores and planning inputs
//! - A search configuration that stops on its iteration cap

#![allow(dead_code)]

pub mod hong_kong_stores;

pub use hong_kong_stores::*;

use robust_route_planner::config::PlannerConfig;
use robust_route_planner::model::{parse_hhmm, Location, PlanningInput, VehicleSpec};

/// Builder for test stores with sensible defaults.
#[derive(Debug, Clone)]
pub struct TestStore {
    id: String,
    location: (f64, f64),
    demand: f64,
    window: (i64, i64),
}

impl TestStore {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            location: DEPOT.coords(),
            demand: 10.0,
            window: (8 * 60, 18 * 60),
        }
    }

    /// A store at a known site, keeping the site id.
    pub fn at(site: &Site) -> Self {
        Self::new(site.id).location(site.lat, site.lng)
    }

    pub fn location(mut self, lat: f64, lng: f64) -> Self {
        self.location = (lat, lng);
        self
    }

    pub fn demand(mut self, demand: f64) -> Self {
        self.demand = demand;
        self
    }

    pub fn window(mut self, start: &str, end: &str) -> Self {
        self.window = (
            parse_hhmm(start).expect("valid start"),
            parse_hhmm(end).expect("valid end"),
        );
        self
    }

    pub fn build(&self) -> Location {
        Location::store(
            self.id.clone(),
            self.location.0,
            self.location.1,
            self.window,
            self.demand,
        )
    }
}

pub fn depot() -> Location {
    Location::depot(DEPOT.id, DEPOT.lat, DEPOT.lng, 8 * 60, 18 * 60)
}

pub fn planning_input(stores: &[TestStore], vehicles: Vec<VehicleSpec>) -> PlanningInput {
    PlanningInput::new(
        depot(),
        stores.iter().map(TestStore::build).collect(),
        vehicles,
    )
    .expect("valid planning input")
}

/// Stores M001-M003 with demands 20/30/25 and 08:00-18:00 windows.
pub fn three_stores() -> Vec<TestStore> {
    STORES[..3]
        .iter()
        .zip([20.0, 30.0, 25.0])
        .map(|(site, demand)| TestStore::at(site).demand(demand))
        .collect()
}

/// Default tuning, bounded by iterations instead of wall-clock time.
pub fn capped_config() -> PlannerConfig {
    let mut config = PlannerConfig::default();
    config.search.max_iterations = 200;
    config.search.time_limit_secs = 30.0;
    config.scenarios.seed = Some(7);
    config
}

/// Looks up a store's site by id.
pub fn site(id: &str) -> &'static Site {
    STORES.iter().find(|site| site.id == id).expect("known store id")
}
