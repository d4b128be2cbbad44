//! Geographic primitives: coordinates, great-circle distance, disk tests.

use serde::{Deserialize, Serialize};

/// Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 coordinate.
///
/// Construction through [`Coordinate::new`] enforces the latitude/longitude
/// ranges; deserialized values are assumed to come from already-validated
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Returns `None` when the pair is outside [-90, 90] x [-180, 180].
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Self { lat, lon })
        } else {
            None
        }
    }

    /// Canonical 6-decimal key, used for matrix index lookups and cache keys.
    pub fn key(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_m(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Whether `point` lies within `radius_km` of `center`.
pub fn within_disk(point: Coordinate, center: Coordinate, radius_km: f64) -> bool {
    haversine_m(point, center) <= radius_km * 1000.0
}
