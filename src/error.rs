//! Planner-level error types and process exit-code mapping.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Top-level failure modes of a planning run.
///
/// Recoverable conditions (partial matrices, stale cache entries, solver
/// backend failures) are handled inside the pipeline and never surface here.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// No valid customers, no enabled vehicles, or a malformed configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Neither backend nor the greedy fallback produced a solution.
    #[error("no feasible or greedy solution could be produced")]
    NoSolution,

    /// Every routing provider failed and no cached matrix was available.
    #[error("routing provider unavailable and no cached matrix: {0}")]
    ProviderUnavailable(#[from] GatewayError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl PlannerError {
    /// Process exit code contract: 2 invalid input, 3 no solution,
    /// 4 provider unavailable.
    pub fn exit_code(&self) -> i32 {
        match self {
            PlannerError::InvalidInput(_) | PlannerError::Config(_) => 2,
            PlannerError::NoSolution => 3,
            PlannerError::ProviderUnavailable(_) => 4,
        }
    }
}

/// Per-record ingest problems. These are warnings, not run aborts: the
/// offending record is dropped and validation continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("customer {id}: latitude {lat} or longitude {lon} out of range")]
    InvalidCoordinate { id: String, lat: f64, lon: f64 },

    #[error("customer {id}: volume {volume} is negative")]
    InvalidVolume { id: String, volume: f64 },

    #[error("customer {id}: duplicate id")]
    DuplicateId { id: String },
}
