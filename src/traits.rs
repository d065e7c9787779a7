//! Seams between the planning core and its collaborators.
//!
//! Distance sources and scenario solvers are injected into the core rather
//! than looked up by name, so tests can substitute simple adapters.

use std::time::Duration;

use crate::error::MatrixError;
use crate::model::{DemandScenario, ScenarioResult};

/// Provides a distance matrix (kilometers) for a set of locations.
///
/// The matrix is indexed by the provided location order. Implementations may
/// return slightly asymmetric values (road networks); the matrix builder
/// symmetrizes them.
pub trait DistanceProvider {
    /// Stable identifier, used to key cached matrices. Sources that can
    /// return different distances for the same coordinates need distinct names.
    fn name(&self) -> &str;

    fn distance_km(&self, locations: &[(f64, f64)]) -> Result<Vec<Vec<f64>>, MatrixError>;
}

/// Solves one demand scenario.
///
/// Returns `None` when the solver produced no plan for the scenario; the
/// built-in routing solver always returns one, with unroutable stores dropped.
/// Implementations must not share mutable state between calls, since the
/// robust optimizer runs them concurrently.
pub trait ScenarioSolver: Sync {
    fn solve_scenario(
        &self,
        scenario: &DemandScenario,
        time_limit: Option<Duration>,
    ) -> Option<ScenarioResult>;
}
