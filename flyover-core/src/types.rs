//! Shared types, error enum, and cycle-scoped value objects for flyover-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by flyover.
#[derive(Debug, Error)]
pub enum FlyoverError {
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("feed error: {0}")]
    Feed(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("timed out after {0:.1}s")]
    Timeout(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlyoverError>;

/// Store-assigned user identifier.
pub type UserId = i64;

// ---------------------------------------------------------------------------
// Positions and aircraft
// ---------------------------------------------------------------------------

/// A point in space: degrees latitude/longitude, altitude in feet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position3D {
    pub lat: f64,
    pub lon: f64,
    pub altitude_ft: f64,
}

impl Position3D {
    pub const fn new(lat: f64, lon: f64, altitude_ft: f64) -> Self {
        Position3D {
            lat,
            lon,
            altitude_ft,
        }
    }
}

/// One aircraft as reported by a single feed poll, already sanitized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftSnapshot {
    pub hex: String,
    pub position: Position3D,
    pub ground_speed_kts: f64,
    /// True track over ground, normalized to [0, 360).
    pub track_deg: f64,
    pub description: String,
}

/// Predicted closest point of an aircraft's path to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClosestApproach {
    pub point: Position3D,
    /// Fraction of the prediction horizon at which the minimum occurs, in [0, 1].
    pub fraction: f64,
    /// 3D slant range in nautical miles.
    pub distance_nm: f64,
}

impl ClosestApproach {
    /// Seconds from now until the closest point is reached.
    pub fn seconds_to_closest(&self, horizon_minutes: f64) -> f64 {
        self.fraction * horizon_minutes * 60.0
    }
}

// ---------------------------------------------------------------------------
// Alert history
// ---------------------------------------------------------------------------

/// An emitted alert. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub user_id: UserId,
    pub hex: String,
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub filter_name: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
