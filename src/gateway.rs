//! Road-network gateway abstraction.
//!
//! A gateway answers two questions: how far/long between sets of coordinates
//! (`table`), and what does the road path between ordered waypoints look like
//! (`route`). Three implementations exist: the static provider ([`crate::osrm`]),
//! the time-dependent provider ([`crate::valhalla`]) and the great-circle
//! fallback ([`crate::haversine`]).

use thiserror::Error;

use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// Typed gateway failures. The matrix builder decides the recovery policy.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The provider answered but left cells null or missing.
    #[error("provider returned a partial matrix ({missing} missing cells)")]
    PartialMatrix { missing: usize },

    /// The request exceeds the provider's URL or payload limit; the caller
    /// should split the request.
    #[error("request too large: {locations} locations")]
    RequestTooLarge { locations: usize },

    /// Timeout, connection failure or 5xx. Retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Anything else: 4xx, unparseable body, provider-level error code.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::ProviderUnavailable(_))
    }
}

/// A sources x targets block of distances and durations.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixChunk {
    /// Row-major meters, `sources.len()` rows by `targets.len()` columns.
    pub distances_m: Vec<Vec<i32>>,
    /// Row-major seconds, same shape.
    pub durations_s: Vec<Vec<i32>>,
}

/// Distance/duration summary plus geometry for one routed path.
#[derive(Debug, Clone)]
pub struct RouteSummary {
    pub geometry: Polyline,
    pub distance_m: i32,
    pub duration_s: i32,
}

/// Source of road-network distances, durations and geometries.
///
/// Implementations are blocking; concurrency comes from the builder's worker
/// pool. All methods must be callable from multiple threads at once.
pub trait RoutingGateway: Send + Sync {
    /// Stable identity used in cache keys and diagnostics.
    fn provider_id(&self) -> &str;

    /// Fetch the `sources` x `targets` grid. `departure_hhmm` is honored only
    /// by time-dependent implementations and must otherwise be ignored.
    ///
    /// Contract: a grid with any missing entry fails with
    /// [`GatewayError::PartialMatrix`]; an oversized request fails with
    /// [`GatewayError::RequestTooLarge`]; timeouts and 5xx map to
    /// [`GatewayError::ProviderUnavailable`].
    fn table(
        &self,
        sources: &[Coordinate],
        targets: &[Coordinate],
        departure_hhmm: Option<&str>,
    ) -> Result<MatrixChunk, GatewayError>;

    /// Route through ordered waypoints (at least two).
    fn route(&self, waypoints: &[Coordinate]) -> Result<RouteSummary, GatewayError>;
}
