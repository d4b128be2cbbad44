//! Static road-network provider (OSRM HTTP adapter).

use serde::Deserialize;
use tracing::debug;

use crate::gateway::{GatewayError, MatrixChunk, RouteSummary, RoutingGateway};
use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// Practical ceiling for GET request URLs accepted by osrm-routed.
const MAX_URL_BYTES: usize = 8_000;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmGateway {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmGateway {
    pub fn new(config: OsrmConfig) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn send_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::ProviderUnavailable(format!("HTTP {}", status)));
        }
        if status == reqwest::StatusCode::URI_TOO_LONG {
            return Err(GatewayError::RequestTooLarge { locations: 0 });
        }
        if !status.is_success() {
            return Err(GatewayError::Malformed(format!("HTTP {}", status)));
        }

        response
            .json::<T>()
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

/// Join coordinates as `lon,lat;lon,lat;...` the way OSRM expects them.
fn coordinate_path(coords: &[Coordinate]) -> String {
    coords
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.lon, c.lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn index_list(range: std::ops::Range<usize>) -> String {
    range
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Convert an optional f64 grid into integers, counting missing cells.
fn convert_grid(
    grid: Option<Vec<Vec<Option<f64>>>>,
    rows: usize,
    cols: usize,
) -> Result<Vec<Vec<i32>>, usize> {
    let Some(grid) = grid else {
        return Err(rows * cols);
    };
    if grid.len() != rows || grid.iter().any(|r| r.len() != cols) {
        return Err(rows * cols);
    }
    let missing = grid
        .iter()
        .flatten()
        .filter(|cell| cell.is_none())
        .count();
    if missing > 0 {
        return Err(missing);
    }
    Ok(grid
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| cell.unwrap_or(0.0).round() as i32)
                .collect()
        })
        .collect())
}

impl RoutingGateway for OsrmGateway {
    fn provider_id(&self) -> &str {
        "osrm"
    }

    fn table(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        _departure_hhmm: Option<&str>,
    ) -> Result<MatrixChunk, GatewayError> {
        let total = sources.len() + targets.len();
        let mut coords = Vec::with_capacity(total);
        coords.extend_from_slice(sources);
        coords.extend_from_slice(targets);

        let url = format!(
            "{}/table/v1/{}/{}?annotations=distance,duration&sources={}&destinations={}",
            self.config.base_url,
            self.config.profile,
            coordinate_path(&coords),
            index_list(0..sources.len()),
            index_list(sources.len()..total),
        );

        if url.len() > MAX_URL_BYTES {
            return Err(GatewayError::RequestTooLarge { locations: total });
        }

        debug!(sources = sources.len(), targets = targets.len(), "osrm table request");
        let body: TableResponse = self.send_json(&url)?;
        if body.code != "Ok" {
            return Err(GatewayError::Malformed(format!("osrm code {}", body.code)));
        }

        let distances = convert_grid(body.distances, sources.len(), targets.len())
            .map_err(|missing| GatewayError::PartialMatrix { missing })?;
        let durations = convert_grid(body.durations, sources.len(), targets.len())
            .map_err(|missing| GatewayError::PartialMatrix { missing })?;

        Ok(MatrixChunk {
            distances_m: distances,
            durations_s: durations,
        })
    }

    fn route(&self, waypoints: &[Coordinate]) -> Result<RouteSummary, GatewayError> {
        if waypoints.len() < 2 {
            return Err(GatewayError::Malformed("route needs two waypoints".into()));
        }

        let url = format!(
            "{}/route/v1/{}/{}?geometries=geojson&overview=full",
            self.config.base_url,
            self.config.profile,
            coordinate_path(waypoints),
        );
        if url.len() > MAX_URL_BYTES {
            return Err(GatewayError::RequestTooLarge {
                locations: waypoints.len(),
            });
        }

        let body: RouteResponse = self.send_json(&url)?;
        if body.code != "Ok" {
            return Err(GatewayError::Malformed(format!("osrm code {}", body.code)));
        }
        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("no route in response".into()))?;

        if route.geometry.kind != "LineString" {
            return Err(GatewayError::Malformed(format!(
                "unexpected geometry type {:?}",
                route.geometry.kind
            )));
        }
        // GeoJSON positions are [lon, lat]; Polyline points are (lat, lon).
        let points = route
            .geometry
            .coordinates
            .into_iter()
            .map(|(lon, lat)| (lat, lon))
            .collect();

        Ok(RouteSummary {
            geometry: Polyline::new(points),
            distance_m: route.distance.round() as i32,
            duration_s: route.duration.round() as i32,
        })
    }
}

// -----------------------------------------------------------------------------
// Wire types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    distances: Option<Vec<Vec<Option<f64>>>>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<RouteBody>,
}

#[derive(Debug, Deserialize)]
struct RouteBody {
    geometry: GeoJsonLineString,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct GeoJsonLineString {
    #[serde(rename = "type")]
    kind: String,
    /// Positions in GeoJSON order: [longitude, latitude].
    coordinates: Vec<(f64, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_path_is_lon_lat() {
        let coords = vec![Coordinate::new(42.7, 23.32).unwrap()];
        assert_eq!(coordinate_path(&coords), "23.320000,42.700000");
    }

    #[test]
    fn route_body_parses_geojson_geometry() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[23.32, 42.70], [23.33, 42.71]]
                },
                "distance": 1523.4,
                "duration": 210.7
            }]
        }"#;
        let parsed: RouteResponse = serde_json::from_str(body).unwrap();
        let route = &parsed.routes[0];
        assert_eq!(route.geometry.kind, "LineString");
        assert_eq!(route.geometry.coordinates[0], (23.32, 42.70));
    }

    #[test]
    fn convert_grid_flags_missing_cells() {
        let grid = Some(vec![vec![Some(1.0), None], vec![Some(2.0), Some(3.0)]]);
        assert_eq!(convert_grid(grid, 2, 2), Err(1));

        let full = Some(vec![vec![Some(1.4), Some(2.6)]]);
        assert_eq!(convert_grid(full, 1, 2), Ok(vec![vec![1, 3]]));

        assert_eq!(convert_grid(None, 2, 2), Err(4));
    }
}
