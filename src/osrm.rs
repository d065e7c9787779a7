//! OSRM HTTP adapter for road-network distance matrices.

use serde::Deserialize;

use crate::error::MatrixError;
use crate::traits::DistanceProvider;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    /// `osrm:<base_url>/<profile>`, the cache identity.
    name: String,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, MatrixError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        let name = format!("osrm:{}/{}", config.base_url.trim_end_matches('/'), config.profile);
        Ok(Self {
            config,
            name,
            client,
        })
    }

    fn table_url(&self, locations: &[(f64, f64)]) -> String {
        let coords = locations
            .iter()
            .map(|(lat, lng)| format!("{:.6},{:.6}", lng, lat))
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?annotations=distance",
            self.config.base_url, self.config.profile, coords
        )
    }
}

impl DistanceProvider for OsrmClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn distance_km(&self, locations: &[(f64, f64)]) -> Result<Vec<Vec<f64>>, MatrixError> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .client
            .get(self.table_url(locations))
            .send()?
            .error_for_status()?
            .json::<OsrmTableResponse>()?;

        table_to_km(body, locations.len())
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    distances: Option<Vec<Vec<Option<f64>>>>,
}

/// Converts an OSRM table (meters, `null` for unroutable pairs) to kilometers.
fn table_to_km(body: OsrmTableResponse, expected: usize) -> Result<Vec<Vec<f64>>, MatrixError> {
    let rows = body.distances.ok_or(MatrixError::IncompleteResponse)?;
    if rows.len() != expected {
        return Err(MatrixError::DimensionMismatch {
            rows: rows.len(),
            expected,
        });
    }

    rows.into_iter()
        .map(|row| {
            if row.len() != expected {
                return Err(MatrixError::DimensionMismatch {
                    rows: row.len(),
                    expected,
                });
            }
            row.into_iter()
                .map(|meters| meters.map(|m| m / 1000.0).ok_or(MatrixError::IncompleteResponse))
                .collect()
        })
        .collect()
}
