//! Distance and travel-time matrices.
//!
//! Index 0 is always the depot. Distances are kept in kilometers for
//! reporting and as scaled integers for the search; travel times are whole
//! minutes, rounded up so no leg between distinct locations takes zero time.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fxhash::{FxHashMap, FxHasher64};
use tracing::debug;

use crate::config::{DistanceMode, PlannerConfig};
use crate::error::MatrixError;
use crate::haversine::HaversineDistance;
use crate::planar::PlanarDistance;
use crate::traits::DistanceProvider;

/// Square, symmetric matrices with a zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelMatrices {
    pub distance_km: Vec<Vec<f64>>,
    pub time_min: Vec<Vec<i64>>,
    /// `distance_km * scale`, rounded.
    pub scaled_distance: Vec<Vec<i64>>,
    pub scale: i64,
}

impl TravelMatrices {
    pub fn size(&self) -> usize {
        self.distance_km.len()
    }

    pub fn scale_km(&self, km: f64) -> i64 {
        scale_value(km, self.scale)
    }

    pub fn unscale(&self, scaled: i64) -> f64 {
        scaled as f64 / self.scale as f64
    }

    pub fn is_symmetric(&self) -> bool {
        let n = self.size();
        (0..n).all(|i| {
            self.distance_km[i][i] == 0.0
                && self.time_min[i][i] == 0
                && (i + 1..n).all(|j| {
                    self.distance_km[i][j] == self.distance_km[j][i]
                        && self.time_min[i][j] == self.time_min[j][i]
                        && self.scaled_distance[i][j] == self.scaled_distance[j][i]
                })
        })
    }
}

/// Builds [`TravelMatrices`] from a distance provider.
#[derive(Debug, Clone)]
pub struct MatrixBuilder<P> {
    provider: P,
    average_speed_kmh: f64,
    scale: i64,
}

impl<P: DistanceProvider> MatrixBuilder<P> {
    pub fn new(provider: P, average_speed_kmh: f64, scale: i64) -> Self {
        Self {
            provider,
            average_speed_kmh,
            scale: scale.max(1),
        }
    }

    pub fn build(&self, locations: &[(f64, f64)]) -> Result<TravelMatrices, MatrixError> {
        let raw = self.provider.distance_km(locations)?;
        let distance_km = symmetrize(raw, locations.len())?;
        let time_min = time_matrix(&distance_km, self.average_speed_kmh);
        let scaled_distance = scale_matrix(&distance_km, self.scale);

        debug!(
            provider = self.provider.name(),
            size = locations.len(),
            "Built travel matrices"
        );

        Ok(TravelMatrices {
            distance_km,
            time_min,
            scaled_distance,
            scale: self.scale,
        })
    }

    fn cache_key(&self, locations: &[(f64, f64)]) -> u64 {
        let mut hasher = FxHasher64::default();
        locations.len().hash(&mut hasher);
        for (lat, lng) in locations {
            hasher.write_u64(lat.to_bits());
            hasher.write_u64(lng.to_bits());
        }
        self.provider.name().hash(&mut hasher);
        hasher.write_u64(self.average_speed_kmh.to_bits());
        self.scale.hash(&mut hasher);
        hasher.finish()
    }
}

/// Builds matrices with the built-in provider selected by `config.distance_mode`.
pub fn build_for_config(
    config: &PlannerConfig,
    locations: &[(f64, f64)],
) -> Result<TravelMatrices, MatrixError> {
    match config.distance_mode {
        DistanceMode::Euclidean => {
            MatrixBuilder::new(PlanarDistance, config.average_speed_kmh, config.distance_scale)
                .build(locations)
        }
        DistanceMode::Haversine => {
            MatrixBuilder::new(HaversineDistance, config.average_speed_kmh, config.distance_scale)
                .build(locations)
        }
    }
}

/// `ceil(km / speed * 60)` per entry, diagonal forced to zero.
pub fn time_matrix(distance_km: &[Vec<f64>], average_speed_kmh: f64) -> Vec<Vec<i64>> {
    distance_km
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, km)| {
                    if i == j {
                        0
                    } else {
                        (km / average_speed_kmh * 60.0).ceil() as i64
                    }
                })
                .collect()
        })
        .collect()
}

pub fn scale_matrix(distance_km: &[Vec<f64>], scale: i64) -> Vec<Vec<i64>> {
    distance_km
        .iter()
        .map(|row| row.iter().map(|km| scale_value(*km, scale)).collect())
        .collect()
}

fn scale_value(km: f64, scale: i64) -> i64 {
    (km * scale as f64).round() as i64
}

/// Averages opposite directions and zeroes the diagonal.
fn symmetrize(mut matrix: Vec<Vec<f64>>, expected: usize) -> Result<Vec<Vec<f64>>, MatrixError> {
    if matrix.len() != expected {
        return Err(MatrixError::DimensionMismatch {
            rows: matrix.len(),
            expected,
        });
    }
    if let Some(row) = matrix.iter().find(|row| row.len() != expected) {
        return Err(MatrixError::DimensionMismatch {
            rows: row.len(),
            expected,
        });
    }

    for i in 0..expected {
        matrix[i][i] = 0.0;
        for j in (i + 1)..expected {
            let mean = (matrix[i][j] + matrix[j][i]) / 2.0;
            matrix[i][j] = mean;
            matrix[j][i] = mean;
        }
    }
    Ok(matrix)
}

/// Caller-owned matrix cache with least-recently-used eviction.
#[derive(Debug)]
pub struct MatrixCache {
    capacity: usize,
    entries: FxHashMap<u64, CacheEntry>,
    clock: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct CacheEntry {
    matrices: Arc<TravelMatrices>,
    last_used: u64,
}

impl MatrixCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: FxHashMap::default(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_build<P: DistanceProvider>(
        &mut self,
        builder: &MatrixBuilder<P>,
        locations: &[(f64, f64)],
    ) -> Result<Arc<TravelMatrices>, MatrixError> {
        self.clock += 1;
        let key = builder.cache_key(locations);

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = self.clock;
            self.hits += 1;
            return Ok(Arc::clone(&entry.matrices));
        }

        self.misses += 1;
        let matrices = Arc::new(builder.build(locations)?);

        if self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }
        self.entries.insert(
            key,
            CacheEntry {
                matrices: Arc::clone(&matrices),
                last_used: self.clock,
            },
        );

        Ok(matrices)
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
