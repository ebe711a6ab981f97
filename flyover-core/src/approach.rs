//! Per-aircraft approach screening.
//!
//! Predicts where an aircraft will be at the end of the horizon, finds its
//! closest approach to the observer, and applies the two cheap rejection
//! gates (too far away, too far in the future) before any rule evaluation.

use std::fmt;

use crate::geometry;
use crate::types::{AircraftSnapshot, ClosestApproach, Position3D};

/// Everything a rule condition can look at for one (observer, aircraft) pair.
#[derive(Debug, Clone)]
pub struct Encounter<'a> {
    pub observer: Position3D,
    pub aircraft: &'a AircraftSnapshot,
    pub approach: ClosestApproach,
    pub seconds_to_closest: f64,
}

impl<'a> Encounter<'a> {
    /// Run prediction and closest approach without any gating.
    pub fn compute(
        observer: Position3D,
        aircraft: &'a AircraftSnapshot,
        horizon_minutes: f64,
    ) -> Self {
        let future = geometry::predict_future_position(aircraft, horizon_minutes);
        let approach = geometry::closest_approach(&observer, &aircraft.position, &future);
        Encounter {
            observer,
            aircraft,
            approach,
            seconds_to_closest: approach.seconds_to_closest(horizon_minutes),
        }
    }

    /// Bearing from the observer to the closest point, in degrees.
    pub fn bearing_deg(&self) -> f64 {
        geometry::bearing(&self.observer, &self.approach.point)
    }

    /// Elevation of the closest point above the observer's horizon.
    pub fn angle_above_horizon(&self) -> f64 {
        geometry::angle_above_horizon(&self.observer, &self.approach.point)
    }

    /// Surface distance from the observer to the closest point.
    pub fn surface_distance_nm(&self) -> f64 {
        geometry::distance_2d_nm(&self.observer, &self.approach.point)
    }
}

/// Bounds for the cheap pre-evaluation gates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreeningLimits {
    pub horizon_minutes: f64,
    /// Largest distance threshold across the user's filters.
    pub max_distance_nm: f64,
    /// Predictions further out than this are re-checked on a later poll.
    pub max_lead_secs: f64,
}

impl ScreeningLimits {
    /// Lead time is capped at two poll intervals.
    pub fn new(horizon_minutes: f64, max_distance_nm: f64, poll_interval_secs: f64) -> Self {
        ScreeningLimits {
            horizon_minutes,
            max_distance_nm,
            max_lead_secs: 2.0 * poll_interval_secs,
        }
    }
}

/// Why an aircraft was skipped before rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooFar { distance_nm: f64 },
    TooEarly { seconds_to_closest: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooFar { distance_nm } => {
                write!(f, "closest approach {distance_nm:.2} nm is beyond every filter")
            }
            Rejection::TooEarly { seconds_to_closest } => {
                write!(f, "closest approach in {seconds_to_closest:.0}s is too far ahead")
            }
        }
    }
}

/// Compute the encounter and apply both gates.
pub fn screen<'a>(
    observer: Position3D,
    aircraft: &'a AircraftSnapshot,
    limits: &ScreeningLimits,
) -> Result<Encounter<'a>, Rejection> {
    let encounter = Encounter::compute(observer, aircraft, limits.horizon_minutes);

    if encounter.approach.distance_nm > limits.max_distance_nm {
        return Err(Rejection::TooFar {
            distance_nm: encounter.approach.distance_nm,
        });
    }
    if encounter.seconds_to_closest > limits.max_lead_secs {
        return Err(Rejection::TooEarly {
            seconds_to_closest: encounter.seconds_to_closest,
        });
    }
    Ok(encounter)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
