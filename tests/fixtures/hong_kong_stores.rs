//! Hong Kong retail store sites for test fixtures.
//!
//! A compact metro area, so the planar distance mode is accurate here.

/// A named site with coordinates.
#[derive(Debug, Clone)]
pub struct Site {
    pub id: &'static str,
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Site {
    pub const fn new(id: &'static str, name: &'static str, lat: f64, lng: f64) -> Self {
        Self { id, name, lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

// ============================================================================
// Distribution Center
// ============================================================================

pub const DEPOT: Site = Site::new("DC", "Tsuen Wan DC", 22.370, 114.113);

// ============================================================================
// Stores
// ============================================================================

pub const STORES: &[Site] = &[
    Site::new("M001", "Tsim Sha Tsui", 22.2988, 114.1722),
    Site::new("M002", "Causeway Bay", 22.2800, 114.1830),
    Site::new("M003", "Central", 22.2820, 114.1580),
    Site::new("M004", "Mongkok", 22.3193, 114.1694),
    Site::new("M005", "Sha Tin", 22.3817, 114.1877),
    Site::new("M006", "Tuen Mun", 22.3908, 113.9728),
    Site::new("M007", "Kwun Tong", 22.3100, 114.2260),
    Site::new("M008", "Yuen Long", 22.4450, 114.0220),
];
