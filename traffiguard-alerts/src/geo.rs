//! Great-circle proximity checks.
//!
//! Distances use the haversine formula on a spherical Earth of radius
//! 6371 km. Accurate to well under 0.5% for the short ranges alerts care
//! about (a few kilometres).

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius used when a caller-facing interface does not specify one.
pub const DEFAULT_RADIUS_KM: f64 = 2.0;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check that both components are finite and inside their ranges.
    ///
    /// Latitude must lie in `[-90, 90]`, longitude in `[-180, 180]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange(self.longitude));
        }
        Ok(())
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

/// Great-circle distance between two positions, in kilometres.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Whether `b` lies within `max_km` of `a`. The boundary is inclusive.
///
/// Out-of-range coordinates are not rejected here; they produce a defined
/// but meaningless answer. Validate at the edges instead.
pub fn within_radius(a: Coordinate, b: Coordinate, max_km: f64) -> bool {
    distance_km(a, b) <= max_km
}
