//! Urban congestion adjustment.
//!
//! Durations between two points that both fall inside the urban disk are
//! scaled by a fixed multiplier. Distances are never touched. The adjustment
//! is applied at most once per matrix; re-running is a no-op.

use tracing::info;

use crate::geo::{within_disk, Coordinate};
use crate::matrix::Matrix;

#[derive(Debug, Clone)]
pub struct TrafficZone {
    pub center: Coordinate,
    pub radius_km: f64,
    pub duration_multiplier: f64,
}

impl TrafficZone {
    /// Scale in-zone durations. Returns how many cells were adjusted; zero
    /// when the matrix was already adjusted.
    pub fn apply(&self, matrix: &mut Matrix) -> usize {
        if matrix.traffic_applied {
            return 0;
        }
        matrix.traffic_applied = true;

        let in_urban: Vec<bool> = matrix
            .coordinates()
            .iter()
            .map(|&c| within_disk(c, self.center, self.radius_km))
            .collect();

        let mut adjusted = 0usize;
        for (i, &row_in) in in_urban.iter().enumerate() {
            if !row_in {
                continue;
            }
            for (j, &col_in) in in_urban.iter().enumerate() {
                if i == j || !col_in {
                    continue;
                }
                let scaled =
                    (f64::from(matrix.durations_s[i][j]) * self.duration_multiplier).round();
                matrix.durations_s[i][j] = scaled as i32;
                adjusted += 1;
            }
        }

        info!(
            adjusted,
            multiplier = self.duration_multiplier,
            "urban traffic adjustment applied"
        );
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn zone() -> TrafficZone {
        TrafficZone {
            center: coord(42.6977, 23.3219),
            radius_km: 5.0,
            duration_multiplier: 1.5,
        }
    }

    fn sample_matrix() -> Matrix {
        // Two urban points near the Sofia center, one far outside the disk.
        let coords = vec![
            coord(42.6980, 23.3220),
            coord(42.7050, 23.3300),
            coord(42.1354, 24.7453),
        ];
        let distances = vec![vec![0, 1000, 140_000], vec![1000, 0, 139_000], vec![140_000, 139_000, 0]];
        let durations = vec![vec![0, 120, 7000], vec![120, 0, 6900], vec![7000, 6900, 0]];
        Matrix::new(coords, distances, durations, 0)
    }

    #[test]
    fn scales_only_in_zone_pairs() {
        let mut matrix = sample_matrix();
        zone().apply(&mut matrix);

        assert_eq!(matrix.durations_s[0][1], 180);
        assert_eq!(matrix.durations_s[1][0], 180);
        // One endpoint outside the disk: untouched.
        assert_eq!(matrix.durations_s[0][2], 7000);
        assert_eq!(matrix.durations_s[2][1], 6900);
        // Distances never change.
        assert_eq!(matrix.distances_m[0][1], 1000);
    }

    #[test]
    fn applying_twice_does_not_compound() {
        let mut once = sample_matrix();
        zone().apply(&mut once);

        let mut twice = sample_matrix();
        zone().apply(&mut twice);
        let adjusted_again = zone().apply(&mut twice);

        assert_eq!(adjusted_again, 0);
        assert_eq!(once.durations_s, twice.durations_s);
    }
}
