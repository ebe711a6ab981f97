//! Aircraft feed records and sanitization.
//!
//! Records follow the readsb/adsb.fi JSON shape. Every field is optional on
//! the wire; `sanitize` decides whether a record is usable and turns it
//! into an `AircraftSnapshot`. Records on the ground or without a geometric
//! altitude never reach the geometry code.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::types::{AircraftSnapshot, FlyoverError, Position3D, Result};

/// Barometric altitude field: feet, or the literal `"ground"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BaroAltitude {
    Feet(f64),
    Status(String),
}

/// One aircraft record as delivered by the feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawAircraft {
    pub hex: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro: Option<BaroAltitude>,
    pub alt_geom: Option<f64>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub desc: Option<String>,
    #[serde(rename = "t")]
    pub type_code: Option<String>,
}

impl RawAircraft {
    pub fn on_ground(&self) -> bool {
        matches!(&self.alt_baro, Some(BaroAltitude::Status(s)) if s.eq_ignore_ascii_case("ground"))
    }

    /// Hex id for log lines, even when the record is unusable.
    pub fn label(&self) -> &str {
        self.hex.as_deref().unwrap_or("?")
    }
}

/// Why a record was dropped before prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    OnGround,
    NoGeometricAltitude,
    Missing(&'static str),
}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dropped::OnGround => write!(f, "on the ground"),
            Dropped::NoGeometricAltitude => write!(f, "no geometric altitude"),
            Dropped::Missing(field) => write!(f, "missing {field}"),
        }
    }
}

fn require(value: Option<f64>, field: &'static str) -> std::result::Result<f64, Dropped> {
    value.filter(|v| v.is_finite()).ok_or(Dropped::Missing(field))
}

/// Validate a feed record and build a snapshot from it.
pub fn sanitize(raw: &RawAircraft) -> std::result::Result<AircraftSnapshot, Dropped> {
    if raw.on_ground() {
        return Err(Dropped::OnGround);
    }
    let altitude_ft = raw
        .alt_geom
        .filter(|a| a.is_finite())
        .ok_or(Dropped::NoGeometricAltitude)?;

    let hex = match raw.hex.as_deref().map(str::trim) {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => return Err(Dropped::Missing("hex")),
    };
    let lat = require(raw.lat, "lat")?;
    let lon = require(raw.lon, "lon")?;
    let gs = require(raw.gs, "gs")?;
    let track = require(raw.track, "track")?;

    let description = raw
        .desc
        .as_deref()
        .or(raw.type_code.as_deref())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("Unknown aircraft")
        .to_string();

    Ok(AircraftSnapshot {
        hex,
        position: Position3D::new(lat, lon, altitude_ft),
        ground_speed_kts: gs,
        track_deg: track.rem_euclid(360.0),
        description,
    })
}

/// Parse a feed response body of the form `{"aircraft": [...]}`.
///
/// Records are decoded one at a time so a single bad record does not lose
/// the batch. Returns the decoded records and the number that failed.
pub fn parse_records(body: &str) -> Result<(Vec<RawAircraft>, usize)> {
    let doc: Value = serde_json::from_str(body)?;
    let list = match doc {
        Value::Object(mut map) => match map.remove("aircraft") {
            Some(Value::Array(list)) => list,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(FlyoverError::Feed("'aircraft' is not an array".into())),
        },
        _ => return Err(FlyoverError::Feed("response is not a JSON object".into())),
    };

    let mut failed = 0;
    let records = list
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<RawAircraft>(v) {
            Ok(r) => Some(r),
            Err(_) => {
                failed += 1;
                None
            }
        })
        .collect();
    Ok((records, failed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn airborne() -> RawAircraft {
        RawAircraft {
            hex: Some("a4f2b1".into()),
            lat: Some(40.05),
            lon: Some(-74.0),
            alt_baro: Some(BaroAltitude::Feet(4900.0)),
            alt_geom: Some(5000.0),
            gs: Some(300.0),
            track: Some(180.0),
            desc: Some("AIRBUS A-320".into()),
            type_code: Some("A320".into()),
        }
    }

    #[test]
    fn test_sanitize_airborne() {
        let ac = sanitize(&airborne()).unwrap();
        assert_eq!(ac.hex, "a4f2b1");
        assert_eq!(ac.position, Position3D::new(40.05, -74.0, 5000.0));
        assert_eq!(ac.ground_speed_kts, 300.0);
        assert_eq!(ac.description, "AIRBUS A-320");
    }

    #[test]
    fn test_sanitize_drops_on_ground() {
        let mut raw = airborne();
        raw.alt_baro = Some(BaroAltitude::Status("ground".into()));
        assert_eq!(sanitize(&raw), Err(Dropped::OnGround));
    }

    #[test]
    fn test_sanitize_drops_missing_geometric_altitude() {
        let mut raw = airborne();
        raw.alt_geom = None;
        assert_eq!(sanitize(&raw), Err(Dropped::NoGeometricAltitude));
    }

    #[test]
    fn test_sanitize_drops_missing_fields() {
        let mut raw = airborne();
        raw.track = None;
        assert_eq!(sanitize(&raw), Err(Dropped::Missing("track")));

        let mut raw = airborne();
        raw.hex = Some("  ".into());
        assert_eq!(sanitize(&raw), Err(Dropped::Missing("hex")));
    }

    #[test]
    fn test_sanitize_description_fallbacks() {
        let mut raw = airborne();
        raw.desc = None;
        assert_eq!(sanitize(&raw).unwrap().description, "A320");

        raw.type_code = None;
        assert_eq!(sanitize(&raw).unwrap().description, "Unknown aircraft");
    }

    #[test]
    fn test_sanitize_normalizes_track() {
        let mut raw = airborne();
        raw.track = Some(-10.0);
        assert!((sanitize(&raw).unwrap().track_deg - 350.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_records() {
        let body = r#"{
            "aircraft": [
                {"hex": "a4f2b1", "lat": 40.05, "lon": -74.0, "alt_baro": 4900,
                 "alt_geom": 5000, "gs": 300.0, "track": 180.0, "t": "A320",
                 "desc": "AIRBUS A-320"},
                {"hex": "c0ffee", "alt_baro": "ground", "lat": 40.6, "lon": -73.8},
                {"hex": "bad", "lat": "not a number"}
            ],
            "now": 1700000000000
        }"#;
        let (records, failed) = parse_records(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(failed, 1);
        assert!(!records[0].on_ground());
        assert!(records[1].on_ground());
        assert_eq!(records[0].type_code.as_deref(), Some("A320"));
    }

    #[test]
    fn test_parse_records_empty_and_invalid() {
        assert_eq!(parse_records(r#"{"aircraft": null}"#).unwrap().0.len(), 0);
        assert_eq!(parse_records(r#"{"msg": "No error"}"#).unwrap().0.len(), 0);
        assert!(parse_records("<html>").is_err());
        assert!(parse_records(r#"{"aircraft": 3}"#).is_err());
    }
}
