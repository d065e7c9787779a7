//! Error types for planning requests.

use thiserror::Error;

/// Failures while producing a distance matrix.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Incomplete response from matrix service")]
    IncompleteResponse,

    #[error("Matrix has {rows} rows, expected {expected}")]
    DimensionMismatch { rows: usize, expected: usize },
}

/// Errors surfaced synchronously to the caller of the planner.
///
/// Per-node infeasibility and single-scenario failures are not errors: the
/// former is handled by dropping the node, the latter by excluding the
/// scenario from the ensemble.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("No stores to route")]
    EmptyStores,

    #[error("No vehicles available")]
    EmptyVehicles,

    #[error("Location {id} has invalid coordinates ({lat}, {lng})")]
    InvalidCoordinates { id: String, lat: f64, lng: f64 },

    #[error("Vehicle {vehicle_id} has invalid capacity {capacity}")]
    InvalidCapacity { vehicle_id: String, capacity: f64 },

    #[error("Invalid time window for {id}: {value}")]
    InvalidTimeWindow { id: String, value: String },

    #[error("Store {id} has invalid demand {demand}")]
    InvalidDemand { id: String, demand: f64 },

    #[error("Unknown search strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Distance matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("Failed to start scenario workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("All {attempted} scenarios failed to produce a solution")]
    AllScenariosFailed { attempted: usize },
}
