//! Route geometry as decoded coordinate sequences.
//!
//! Providers speak the Google Polyline Algorithm format on the wire; the
//! planner core works with decoded points. Encoding/decoding lives here so
//! both the static and the time-dependent adapters share one implementation.

use serde::{Deserialize, Serialize};

/// A route geometry as decoded (latitude, longitude) points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<(f64, f64)>,
}

impl Polyline {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Decode a polyline-encoded string. `precision` is 5 for OSRM-style
    /// geometries and 6 for Valhalla's shape encoding.
    pub fn from_encoded(encoded: &str, precision: u32) -> Self {
        Self {
            points: decode(encoded, precision),
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(f64, f64)> {
        self.points
    }

    pub fn encoded(&self, precision: u32) -> String {
        encode(&self.points, precision)
    }
}

fn decode(encoded: &str, precision: u32) -> Vec<(f64, f64)> {
    let factor = 10f64.powi(precision as i32);
    let mut points = Vec::new();
    let mut lat = 0i64;
    let mut lon = 0i64;
    let bytes = encoded.as_bytes();
    let mut index = 0;

    fn next_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
        let mut shift = 0;
        let mut result = 0i64;
        loop {
            let byte = *bytes.get(*index)? as i64 - 63;
            *index += 1;
            result |= (byte & 0x1f) << shift;
            shift += 5;
            if byte < 0x20 {
                break;
            }
        }
        Some(if (result & 1) != 0 {
            !(result >> 1)
        } else {
            result >> 1
        })
    }

    while index < bytes.len() {
        let Some(dlat) = next_value(bytes, &mut index) else { break };
        let Some(dlon) = next_value(bytes, &mut index) else { break };
        lat += dlat;
        lon += dlon;
        points.push((lat as f64 / factor, lon as f64 / factor));
    }

    points
}

fn encode(points: &[(f64, f64)], precision: u32) -> String {
    let factor = 10f64.powi(precision as i32);
    let mut encoded = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for &(lat, lon) in points {
        let lat_scaled = (lat * factor).round() as i64;
        let lon_scaled = (lon * factor).round() as i64;
        encode_value(lat_scaled - prev_lat, &mut encoded);
        encode_value(lon_scaled - prev_lon, &mut encoded);
        prev_lat = lat_scaled;
        prev_lon = lon_scaled;
    }

    encoded
}

fn encode_value(mut value: i64, output: &mut String) {
    value = if value < 0 { !(value << 1) } else { value << 1 };
    while value >= 0x20 {
        output.push((((value & 0x1f) | 0x20) as u8 + 63) as char);
        value >>= 5;
    }
    output.push((value as u8 + 63) as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_precision_5() {
        let points = vec![(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        let encoded = Polyline::new(points.clone()).encoded(5);
        // Known encoding from the polyline algorithm reference.
        assert_eq!(encoded, "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        let decoded = Polyline::from_encoded(&encoded, 5);
        for (a, b) in decoded.points().iter().zip(&points) {
            assert!((a.0 - b.0).abs() < 1e-5);
            assert!((a.1 - b.1).abs() < 1e-5);
        }
    }

    #[test]
    fn round_trip_precision_6() {
        let points = vec![(42.697708, 23.321867), (42.701234, 23.330456)];
        let encoded = Polyline::new(points.clone()).encoded(6);
        let decoded = Polyline::from_encoded(&encoded, 6);
        for (a, b) in decoded.points().iter().zip(&points) {
            assert!((a.0 - b.0).abs() < 1e-6);
            assert!((a.1 - b.1).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_polyline() {
        assert!(Polyline::from_encoded("", 5).points().is_empty());
        assert!(Polyline::new(vec![]).encoded(5).is_empty());
    }
}
