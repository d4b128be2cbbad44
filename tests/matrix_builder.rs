//! Matrix builder behavior against a scripted in-process gateway.
//!
//! Covers strategy selection, stitching, the retry/split/degrade ladder,
//! caching, and cancellation without any network.

mod fixtures;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use fleet_planner::cache::MatrixCache;
use fleet_planner::gateway::{GatewayError, MatrixChunk, RouteSummary, RoutingGateway};
use fleet_planner::geo::Coordinate;
use fleet_planner::matrix::{BuilderConfig, MatrixBuilder};
use fleet_planner::polyline::Polyline;

use fixtures::coord;

// ============================================================================
// Scripted gateway
// ============================================================================

/// Deterministic fake provider. Distances derive from coordinate deltas so
/// stitched cells can be checked exactly.
#[derive(Default)]
struct ScriptedGateway {
    table_calls: AtomicUsize,
    route_calls: AtomicUsize,
    /// Fail this many leading table calls with `ProviderUnavailable`.
    transient_failures: AtomicUsize,
    /// Requests above this location count get `RequestTooLarge`.
    max_locations: Option<usize>,
    /// Every table call fails permanently.
    always_malformed: bool,
}

fn fake_distance(from: Coordinate, to: Coordinate) -> i32 {
    (((from.lat - to.lat).abs() + (from.lon - to.lon).abs()) * 100_000.0).round() as i32
}

impl RoutingGateway for ScriptedGateway {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn table(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        _departure_hhmm: Option<&str>,
    ) -> Result<MatrixChunk, GatewayError> {
        self.table_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(limit) = self.max_locations {
            if sources.len() + targets.len() > limit {
                return Err(GatewayError::RequestTooLarge {
                    locations: sources.len() + targets.len(),
                });
            }
        }
        if self.always_malformed {
            return Err(GatewayError::Malformed("scripted failure".into()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::ProviderUnavailable("scripted outage".into()));
        }

        let distances: Vec<Vec<i32>> = sources
            .iter()
            .map(|&s| targets.iter().map(|&t| fake_distance(s, t)).collect())
            .collect();
        let durations: Vec<Vec<i32>> = distances
            .iter()
            .map(|row| row.iter().map(|&d| d / 10).collect())
            .collect();
        Ok(MatrixChunk {
            distances_m: distances,
            durations_s: durations,
        })
    }

    fn route(&self, waypoints: &[Coordinate]) -> Result<RouteSummary, GatewayError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        let distance = fake_distance(waypoints[0], waypoints[1]);
        Ok(RouteSummary {
            geometry: Polyline::new(Vec::new()),
            distance_m: distance,
            duration_s: distance / 10,
        })
    }
}

fn grid_locations(n: usize) -> Vec<Coordinate> {
    (0..n)
        .map(|i| coord(42.70 + (i as f64) * 0.01, 23.32 + (i as f64) * 0.002))
        .collect()
}

fn fast_config() -> BuilderConfig {
    BuilderConfig {
        retry_base_delay_ms: 1,
        ..BuilderConfig::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn small_input_uses_one_table_call() {
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(3);
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .build(&locations)
        .unwrap();

    assert_eq!(gateway.table_calls.load(Ordering::SeqCst), 1);
    assert_eq!(matrix.len(), 3);
    for i in 0..3 {
        assert_eq!(matrix.distances_m[i][i], 0);
        for j in 0..3 {
            if i != j {
                assert_eq!(
                    matrix.distances_m[i][j],
                    fake_distance(locations[i], locations[j])
                );
            }
        }
    }
    assert_eq!(matrix.degraded_cells, 0);
}

#[test]
fn medium_input_tiles_and_stitches_by_absolute_index() {
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(10);
    let config = BuilderConfig {
        single_table_max: 4,
        chunk_size: 4,
        ..fast_config()
    };
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(config)
        .build(&locations)
        .unwrap();

    // ceil(10 / 4) = 3 chunk bounds, 9 tile jobs.
    assert_eq!(gateway.table_calls.load(Ordering::SeqCst), 9);
    for i in 0..10 {
        for j in 0..10 {
            let expected = if i == j {
                0
            } else {
                fake_distance(locations[i], locations[j])
            };
            assert_eq!(matrix.distances_m[i][j], expected, "cell ({}, {})", i, j);
        }
    }
}

#[test]
fn oversized_requests_split_until_they_fit() {
    let gateway = ScriptedGateway {
        max_locations: Some(6),
        ..ScriptedGateway::default()
    };
    let locations = grid_locations(10);
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .build(&locations)
        .unwrap();

    assert_eq!(matrix.degraded_cells, 0);
    for i in 0..10 {
        for j in 0..10 {
            if i != j {
                assert_eq!(
                    matrix.distances_m[i][j],
                    fake_distance(locations[i], locations[j])
                );
            }
        }
    }
}

#[test]
fn transient_failures_are_retried() {
    let gateway = ScriptedGateway {
        transient_failures: AtomicUsize::new(2),
        ..ScriptedGateway::default()
    };
    let locations = grid_locations(3);
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .build(&locations)
        .unwrap();

    assert_eq!(gateway.table_calls.load(Ordering::SeqCst), 3);
    assert_eq!(matrix.degraded_cells, 0);
}

#[test]
fn persistent_failure_degrades_to_great_circle() {
    let gateway = ScriptedGateway {
        always_malformed: true,
        ..ScriptedGateway::default()
    };
    let locations = grid_locations(3);
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .build(&locations)
        .unwrap();

    assert_eq!(matrix.degraded_cells, 9);
    // Degraded cells carry haversine estimates, not zeros.
    assert!(matrix.distances_m[0][1] > 0);
    assert_eq!(matrix.distances_m[0][0], 0);
}

#[test]
fn second_build_within_ttl_hits_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(4);

    let first = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .with_cache(&cache)
        .build(&locations)
        .unwrap();
    let calls_after_first = gateway.table_calls.load(Ordering::SeqCst);

    let second = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .with_cache(&cache)
        .build(&locations)
        .unwrap();

    assert_eq!(
        gateway.table_calls.load(Ordering::SeqCst),
        calls_after_first,
        "cache hit must issue zero provider requests"
    );
    assert_eq!(first.distances_m, second.distances_m);
    assert_eq!(first.durations_s, second.durations_s);
}

#[test]
fn departure_time_changes_the_cache_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(3);

    MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .with_cache(&cache)
        .build(&locations)
        .unwrap();
    MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .with_cache(&cache)
        .with_departure(Some("08:30".to_string()))
        .build(&locations)
        .unwrap();

    // Different departure, different entry: two real builds.
    assert_eq!(gateway.table_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn large_input_falls_back_to_pairwise_routes() {
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(5);
    let config = BuilderConfig {
        single_table_max: 2,
        tiled_max: 3,
        ..fast_config()
    };
    let matrix = MatrixBuilder::new(&gateway)
        .with_config(config)
        .build(&locations)
        .unwrap();

    assert_eq!(gateway.table_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.route_calls.load(Ordering::SeqCst), 20);
    for i in 0..5 {
        for j in 0..5 {
            let expected = if i == j {
                0
            } else {
                fake_distance(locations[i], locations[j])
            };
            assert_eq!(matrix.distances_m[i][j], expected);
        }
    }
}

#[test]
fn cancellation_aborts_the_build() {
    let gateway = ScriptedGateway::default();
    let locations = grid_locations(3);
    let cancel = AtomicBool::new(true);

    let result = MatrixBuilder::new(&gateway)
        .with_config(fast_config())
        .with_cancel_flag(&cancel)
        .build(&locations);
    assert!(result.is_err());
}
