//! Time-dependent road-network provider (Valhalla HTTP adapter).
//!
//! Unlike the static provider this one accepts a departure time, which the
//! engine folds into its time-aware costing.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::gateway::{GatewayError, MatrixChunk, RouteSummary, RoutingGateway};
use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// Request-size ceiling; sources_to_targets above this gets split by the
/// builder anyway, the guard just fails fast.
const MAX_LOCATIONS_PER_REQUEST: usize = 200;

#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    pub base_url: String,
    pub costing: String,
    pub timeout_secs: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            costing: "auto".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValhallaGateway {
    config: ValhallaConfig,
    client: reqwest::blocking::Client,
}

impl ValhallaGateway {
    pub fn new(config: ValhallaConfig) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| GatewayError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::ProviderUnavailable(format!("HTTP {}", status)));
        }
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
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

#[derive(Debug, Serialize)]
struct WireLocation {
    lat: f64,
    lon: f64,
}

impl From<&Coordinate> for WireLocation {
    fn from(c: &Coordinate) -> Self {
        Self { lat: c.lat, lon: c.lon }
    }
}

/// Valhalla `date_time` type 1 = depart-at, anchored to the current day.
fn date_time_value(departure_hhmm: &str) -> serde_json::Value {
    let today = chrono::Local::now().date_naive();
    json!({ "type": 1, "value": format!("{}T{}", today.format("%Y-%m-%d"), departure_hhmm) })
}

impl RoutingGateway for ValhallaGateway {
    fn provider_id(&self) -> &str {
        "valhalla"
    }

    fn table(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        departure_hhmm: Option<&str>,
    ) -> Result<MatrixChunk, GatewayError> {
        let total = sources.len() + targets.len();
        if total > MAX_LOCATIONS_PER_REQUEST {
            return Err(GatewayError::RequestTooLarge { locations: total });
        }

        let mut body = json!({
            "sources": sources.iter().map(WireLocation::from).collect::<Vec<_>>(),
            "targets": targets.iter().map(WireLocation::from).collect::<Vec<_>>(),
            "costing": self.config.costing,
        });
        if let Some(departure) = departure_hhmm {
            body["date_time"] = date_time_value(departure);
        }

        debug!(sources = sources.len(), targets = targets.len(), "valhalla matrix request");
        let response: MatrixResponse = self.post_json("/sources_to_targets", &body)?;

        let rows = sources.len();
        let cols = targets.len();
        if response.sources_to_targets.len() != rows {
            return Err(GatewayError::PartialMatrix { missing: rows * cols });
        }

        let mut distances = Vec::with_capacity(rows);
        let mut durations = Vec::with_capacity(rows);
        let mut missing = 0usize;
        for row in &response.sources_to_targets {
            if row.len() != cols {
                missing += cols.saturating_sub(row.len());
            }
            let mut dist_row = Vec::with_capacity(cols);
            let mut time_row = Vec::with_capacity(cols);
            for cell in row {
                match (cell.distance, cell.time) {
                    (Some(km), Some(seconds)) => {
                        dist_row.push((km * 1000.0).round() as i32);
                        time_row.push(seconds.round() as i32);
                    }
                    _ => {
                        missing += 1;
                        dist_row.push(0);
                        time_row.push(0);
                    }
                }
            }
            distances.push(dist_row);
            durations.push(time_row);
        }
        if missing > 0 {
            return Err(GatewayError::PartialMatrix { missing });
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

        let body = json!({
            "locations": waypoints.iter().map(WireLocation::from).collect::<Vec<_>>(),
            "costing": self.config.costing,
        });
        let response: RouteResponse = self.post_json("/route", &body)?;

        let legs = response.trip.legs;
        if legs.is_empty() {
            return Err(GatewayError::Malformed("route response has no legs".into()));
        }

        let mut points = Vec::new();
        for leg in &legs {
            // Valhalla encodes shapes at 1e-6 precision.
            let decoded = Polyline::from_encoded(&leg.shape, 6);
            if points.is_empty() {
                points.extend_from_slice(decoded.points());
            } else {
                points.extend(decoded.points().iter().skip(1).copied());
            }
        }

        let summary = response.trip.summary;
        Ok(RouteSummary {
            geometry: Polyline::new(points),
            distance_m: (summary.length * 1000.0).round() as i32,
            duration_s: summary.time.round() as i32,
        })
    }
}

// -----------------------------------------------------------------------------
// Wire types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Kilometers.
    distance: Option<f64>,
    /// Seconds.
    time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    legs: Vec<Leg>,
    summary: TripSummary,
}

#[derive(Debug, Deserialize)]
struct Leg {
    shape: String,
}

#[derive(Debug, Deserialize)]
struct TripSummary {
    /// Kilometers.
    length: f64,
    /// Seconds.
    time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_cells_parse_km_and_seconds() {
        let body = r#"{
            "sources_to_targets": [
                [{"distance": 1.2, "time": 120.0}, {"distance": 0.0, "time": 0.0}]
            ]
        }"#;
        let parsed: MatrixResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.sources_to_targets[0][0].distance, Some(1.2));
    }

    #[test]
    fn missing_cells_parse_as_none() {
        let body = r#"{
            "sources_to_targets": [[{"distance": null, "time": null}]]
        }"#;
        let parsed: MatrixResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.sources_to_targets[0][0].distance, None);
    }
}
