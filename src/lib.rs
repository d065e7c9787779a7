//! robust-route-planner core
//!
//! Plans daily store deliveries as a capacitated vehicle routing problem with
//! time windows, solved over an ensemble of demand scenarios so the executed
//! plan holds up when the forecast is wrong.

pub mod config;
pub mod error;
pub mod haversine;
pub mod matrix;
pub mod model;
pub mod osrm;
pub mod planar;
pub mod report;
pub mod robust;
pub mod scenario;
pub mod search;
pub mod solver;
pub mod traits;
