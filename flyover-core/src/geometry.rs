//! Straight-line trajectory prediction and closest-approach geometry.
//!
//! All functions are pure. Surface distances use the haversine formula on a
//! sphere of radius 6371 km, computed in feet so they combine directly with
//! altitude differences, then reported in nautical miles.

use crate::types::{AircraftSnapshot, ClosestApproach, Position3D};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const FEET_PER_NM: f64 = 6076.12;
pub const FEET_PER_KM: f64 = 3280.84;
pub const EARTH_RADIUS_FT: f64 = 6371.0 * FEET_PER_KM;

/// Sample intervals along the predicted path (101 points including both ends).
pub const APPROACH_SAMPLES: usize = 100;

pub const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

// ---------------------------------------------------------------------------
// Distances
// ---------------------------------------------------------------------------

/// Great-circle distance in feet.
pub fn haversine_ft(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_FT * 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt())
}

fn surface_ft(p: &Position3D, q: &Position3D) -> f64 {
    haversine_ft(p.lat, p.lon, q.lat, q.lon)
}

/// Surface distance in nautical miles, altitude ignored.
pub fn distance_2d_nm(p: &Position3D, q: &Position3D) -> f64 {
    surface_ft(p, q) / FEET_PER_NM
}

/// Slant range in nautical miles: surface distance and altitude difference
/// combined as legs of a right triangle.
pub fn distance_3d_nm(p: &Position3D, q: &Position3D) -> f64 {
    surface_ft(p, q).hypot(q.altitude_ft - p.altitude_ft) / FEET_PER_NM
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Extrapolate an aircraft along its track at constant ground speed.
///
/// Altitude is held constant. Uses the small-angle displacement on the
/// sphere, which is accurate over the few-minute horizons this is used for.
pub fn predict_future_position(aircraft: &AircraftSnapshot, horizon_minutes: f64) -> Position3D {
    let origin = aircraft.position;
    let track = aircraft.track_deg.rem_euclid(360.0).to_radians();
    let speed_fpm = aircraft.ground_speed_kts * FEET_PER_NM / 60.0;
    let traveled_ft = speed_fpm * horizon_minutes;

    let dlat = traveled_ft * track.cos() / EARTH_RADIUS_FT;
    let dlon = traveled_ft * track.sin() / (EARTH_RADIUS_FT * origin.lat.to_radians().cos());

    Position3D::new(
        origin.lat + dlat.to_degrees(),
        origin.lon + dlon.to_degrees(),
        origin.altitude_ft,
    )
}

fn interpolate(start: &Position3D, end: &Position3D, t: f64) -> Position3D {
    Position3D::new(
        start.lat + t * (end.lat - start.lat),
        start.lon + t * (end.lon - start.lon),
        start.altitude_ft + t * (end.altitude_ft - start.altitude_ft),
    )
}

/// Closest point of the segment `start..end` to `observer`, sampled at
/// [`APPROACH_SAMPLES`] even intervals.
pub fn closest_approach(observer: &Position3D, start: &Position3D, end: &Position3D) -> ClosestApproach {
    closest_approach_sampled(observer, start, end, APPROACH_SAMPLES)
}

/// Closest approach with an explicit number of sample intervals.
///
/// Ties keep the earliest sample.
pub fn closest_approach_sampled(
    observer: &Position3D,
    start: &Position3D,
    end: &Position3D,
    samples: usize,
) -> ClosestApproach {
    let samples = samples.max(1);
    let mut best = ClosestApproach {
        point: *start,
        fraction: 0.0,
        distance_nm: distance_3d_nm(observer, start),
    };

    for i in 1..=samples {
        let t = i as f64 / samples as f64;
        let point = interpolate(start, end, t);
        let distance_nm = distance_3d_nm(observer, &point);
        if distance_nm < best.distance_nm {
            best = ClosestApproach {
                point,
                fraction: t,
                distance_nm,
            };
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Angles
// ---------------------------------------------------------------------------

/// Elevation of `target` seen from `observer`, in degrees. Negative below
/// the horizon.
///
/// Coincident points give `atan2(0, 0)`, which is 0°. A target straight
/// overhead gives 90°.
pub fn angle_above_horizon(observer: &Position3D, target: &Position3D) -> f64 {
    let vertical = target.altitude_ft - observer.altitude_ft;
    vertical.atan2(surface_ft(observer, target)).to_degrees()
}

/// Initial great-circle bearing from `from` to `to`, in [0, 360).
pub fn bearing(from: &Position3D, to: &Position3D) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let dlon = (to.lon - from.lon).to_radians();

    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    let deg = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

/// 16-point compass label for a bearing. Sector boundaries round up.
pub fn compass_label(bearing_deg: f64) -> &'static str {
    let sector = (bearing_deg.rem_euclid(360.0) / 22.5 + 0.5).floor() as usize;
    COMPASS_POINTS[sector % COMPASS_POINTS.len()]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
