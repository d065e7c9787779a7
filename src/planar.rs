//! Planar distance provider.
//!
//! Treats degree differences as a flat grid at a fixed kilometers-per-degree
//! scale. Accurate enough inside a compact metro area and much cheaper than
//! great-circle math.

use crate::error::MatrixError;
use crate::traits::DistanceProvider;

/// Kilometers per degree used by the planar approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

#[derive(Debug, Clone, Default)]
pub struct PlanarDistance;

impl PlanarDistance {
    pub fn planar_km(from: (f64, f64), to: (f64, f64)) -> f64 {
        let dlat = (to.0 - from.0) * KM_PER_DEGREE;
        let dlng = (to.1 - from.1) * KM_PER_DEGREE;
        (dlat * dlat + dlng * dlng).sqrt()
    }
}

impl DistanceProvider for PlanarDistance {
    fn name(&self) -> &str {
        "euclidean"
    }

    fn distance_km(&self, locations: &[(f64, f64)]) -> Result<Vec<Vec<f64>>, MatrixError> {
        let n = locations.len();
        let mut matrix = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in (i + 1)..n {
                let km = Self::planar_km(locations[i], locations[j]);
                matrix[i][j] = km;
                matrix[j][i] = km;
            }
        }

        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_north() {
        let km = PlanarDistance::planar_km((22.0, 114.0), (23.0, 114.0));
        assert!((km - 111.0).abs() < 1e-9);
    }

    #[test]
    fn test_pythagorean() {
        // 0.03 deg and 0.04 deg legs -> 0.05 deg hypotenuse
        let km = PlanarDistance::planar_km((0.0, 0.0), (0.03, 0.04));
        assert!((km - 0.05 * KM_PER_DEGREE).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_shape() {
        let locations = vec![(22.37, 114.11), (22.30, 114.17)];
        let matrix = PlanarDistance.distance_km(&locations).unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0][0], 0.0);
        assert_eq!(matrix[0][1], matrix[1][0]);
    }
}
