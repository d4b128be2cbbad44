//! Great-circle fallback gateway.
//!
//! Estimates distance as the haversine great-circle and duration as distance
//! over a fixed average urban speed. Less accurate than a road network but
//! always available, which is what the builder's last fallback tier needs.

use crate::gateway::{GatewayError, MatrixChunk, RouteSummary, RoutingGateway};
use crate::geo::{haversine_m, Coordinate};
use crate::polyline::Polyline;

/// Average driving speed assumption for duration estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Clone)]
pub struct HaversineGateway {
    pub speed_kmh: f64,
}

impl Default for HaversineGateway {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineGateway {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// (meters, seconds) between two coordinates.
    pub fn estimate(&self, from: Coordinate, to: Coordinate) -> (i32, i32) {
        let meters = haversine_m(from, to);
        let seconds = meters / 1000.0 / self.speed_kmh * 3600.0;
        (meters.round() as i32, seconds.round() as i32)
    }
}

impl RoutingGateway for HaversineGateway {
    fn provider_id(&self) -> &str {
        "haversine"
    }

    fn table(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        _departure_hhmm: Option<&str>,
    ) -> Result<MatrixChunk, GatewayError> {
        let mut distances = Vec::with_capacity(sources.len());
        let mut durations = Vec::with_capacity(sources.len());
        for from in sources {
            let mut dist_row = Vec::with_capacity(targets.len());
            let mut time_row = Vec::with_capacity(targets.len());
            for to in targets {
                if from.key() == to.key() {
                    dist_row.push(0);
                    time_row.push(0);
                } else {
                    let (m, s) = self.estimate(*from, *to);
                    dist_row.push(m);
                    time_row.push(s);
                }
            }
            distances.push(dist_row);
            durations.push(time_row);
        }
        Ok(MatrixChunk {
            distances_m: distances,
            durations_s: durations,
        })
    }

    fn route(&self, waypoints: &[Coordinate]) -> Result<RouteSummary, GatewayError> {
        if waypoints.len() < 2 {
            return Err(GatewayError::Malformed("route needs two waypoints".into()));
        }
        let mut distance = 0i32;
        let mut duration = 0i32;
        for pair in waypoints.windows(2) {
            let (m, s) = self.estimate(pair[0], pair[1]);
            distance += m;
            duration += s;
        }
        let points = waypoints.iter().map(|c| (c.lat, c.lon)).collect();
        Ok(RouteSummary {
            geometry: Polyline::new(points),
            distance_m: distance,
            duration_s: duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn diagonal_is_zero() {
        let gateway = HaversineGateway::default();
        let points = vec![coord(42.70, 23.32), coord(42.71, 23.33), coord(42.72, 23.34)];
        let chunk = gateway.table(&points, &points, None).unwrap();
        for i in 0..points.len() {
            assert_eq!(chunk.distances_m[i][i], 0);
            assert_eq!(chunk.durations_s[i][i], 0);
        }
    }

    #[test]
    fn symmetric_estimates() {
        let gateway = HaversineGateway::default();
        let a = coord(42.70, 23.32);
        let b = coord(42.75, 23.40);
        assert_eq!(gateway.estimate(a, b), gateway.estimate(b, a));
    }

    #[test]
    fn forty_kmh_duration() {
        let gateway = HaversineGateway::new(40.0);
        let a = coord(42.70, 23.32);
        let b = coord(42.79, 23.32);
        let (meters, seconds) = gateway.estimate(a, b);
        // 40 km/h = 90 seconds per kilometer.
        let expected = (f64::from(meters) / 1000.0 * 90.0).round() as i32;
        assert!((seconds - expected).abs() <= 1);
    }

    #[test]
    fn route_sums_leg_estimates() {
        let gateway = HaversineGateway::default();
        let points = vec![coord(42.70, 23.32), coord(42.71, 23.33), coord(42.72, 23.34)];
        let summary = gateway.route(&points).unwrap();
        let (d1, _) = gateway.estimate(points[0], points[1]);
        let (d2, _) = gateway.estimate(points[1], points[2]);
        assert_eq!(summary.distance_m, d1 + d2);
        assert_eq!(summary.geometry.points().len(), 3);
    }
}
