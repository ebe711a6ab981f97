//! Alert rules: typed conditions, ranked filters, first-match evaluation.
//!
//! A user's filters arrive from the store as loosely typed definitions
//! (`FilterDef`). `compile` turns them into a `RuleSet`, dropping and
//! reporting any filter that cannot be evaluated. `RuleSet::evaluate` walks
//! the filters in rank order and returns the first one whose conditions all
//! hold, together with the notification to send.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::approach::Encounter;
use crate::geometry;
use crate::types::{FlyoverError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const KIND_3D_DISTANCE: &str = "3d_distance";
pub const KIND_2D_DISTANCE: &str = "2d_distance";
pub const KIND_ANGLE_ABOVE_HORIZON: &str = "angle_above_horizon";
pub const KIND_ALTITUDE_BELOW: &str = "altitude_below";

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// One atomic test within a filter.
///
/// Distance and angle thresholds are inclusive. `AltitudeBelow` is strict
/// and looks at the aircraft's current altitude, not the predicted one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    #[serde(rename = "3d_distance")]
    Distance3d { max_distance: f64 },
    #[serde(rename = "2d_distance")]
    Distance2d { max_distance: f64 },
    #[serde(rename = "angle_above_horizon")]
    AngleAboveHorizon { min_angle: f64 },
    #[serde(rename = "altitude_below")]
    AltitudeBelow { max_altitude: f64 },
}

impl Condition {
    /// Build a condition from its stored kind and parameter object.
    ///
    /// Thresholds may be JSON numbers or numeric strings.
    pub fn parse(kind: &str, params: &Value) -> Result<Condition> {
        let threshold = |key: &str| -> Result<f64> {
            params
                .get(key)
                .and_then(value_as_f64)
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    FlyoverError::InvalidCondition(format!(
                        "{kind}: missing or non-numeric '{key}'"
                    ))
                })
        };
        let distance = |key: &str| -> Result<f64> {
            let v = threshold(key)?;
            if v < 0.0 {
                return Err(FlyoverError::InvalidCondition(format!(
                    "{kind}: negative '{key}' ({v})"
                )));
            }
            Ok(v)
        };

        match kind {
            KIND_3D_DISTANCE => Ok(Condition::Distance3d {
                max_distance: distance("max_distance")?,
            }),
            KIND_2D_DISTANCE => Ok(Condition::Distance2d {
                max_distance: distance("max_distance")?,
            }),
            KIND_ANGLE_ABOVE_HORIZON => Ok(Condition::AngleAboveHorizon {
                min_angle: threshold("min_angle")?,
            }),
            KIND_ALTITUDE_BELOW => Ok(Condition::AltitudeBelow {
                max_altitude: threshold("max_altitude")?,
            }),
            other => Err(FlyoverError::InvalidCondition(format!(
                "unknown condition type '{other}'"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Distance3d { .. } => KIND_3D_DISTANCE,
            Condition::Distance2d { .. } => KIND_2D_DISTANCE,
            Condition::AngleAboveHorizon { .. } => KIND_ANGLE_ABOVE_HORIZON,
            Condition::AltitudeBelow { .. } => KIND_ALTITUDE_BELOW,
        }
    }

    /// Parameter object in the stored representation.
    pub fn params(&self) -> Value {
        match *self {
            Condition::Distance3d { max_distance } | Condition::Distance2d { max_distance } => {
                json!({ "max_distance": max_distance })
            }
            Condition::AngleAboveHorizon { min_angle } => json!({ "min_angle": min_angle }),
            Condition::AltitudeBelow { max_altitude } => json!({ "max_altitude": max_altitude }),
        }
    }

    /// Distance bound if this is a distance condition.
    pub fn distance_limit(&self) -> Option<f64> {
        match *self {
            Condition::Distance3d { max_distance } | Condition::Distance2d { max_distance } => {
                Some(max_distance)
            }
            _ => None,
        }
    }

    pub fn holds(&self, enc: &Encounter<'_>) -> bool {
        match *self {
            Condition::Distance3d { max_distance } => enc.approach.distance_nm <= max_distance,
            Condition::Distance2d { max_distance } => enc.surface_distance_nm() <= max_distance,
            Condition::AngleAboveHorizon { min_angle } => enc.angle_above_horizon() >= min_angle,
            Condition::AltitudeBelow { max_altitude } => {
                enc.aircraft.position.altitude_ft < max_altitude
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Distance3d { max_distance } => write!(f, "3D distance <= {max_distance} nm"),
            Condition::Distance2d { max_distance } => write!(f, "2D distance <= {max_distance} nm"),
            Condition::AngleAboveHorizon { min_angle } => write!(f, "angle >= {min_angle} deg"),
            Condition::AltitudeBelow { max_altitude } => write!(f, "altitude < {max_altitude} ft"),
        }
    }
}

/// Shorthand `kind=threshold`, e.g. `3d_distance=5` or `angle_above_horizon=10`.
impl FromStr for Condition {
    type Err = FlyoverError;

    fn from_str(s: &str) -> Result<Condition> {
        let (kind, value) = s.split_once('=').ok_or_else(|| {
            FlyoverError::InvalidCondition(format!("expected kind=value, got '{s}'"))
        })?;
        let kind = kind.trim();
        let key = match kind {
            KIND_3D_DISTANCE | KIND_2D_DISTANCE => "max_distance",
            KIND_ANGLE_ABOVE_HORIZON => "min_angle",
            KIND_ALTITUDE_BELOW => "max_altitude",
            other => {
                return Err(FlyoverError::InvalidCondition(format!(
                    "unknown condition type '{other}'"
                )))
            }
        };
        Condition::parse(kind, &json!({ key: value.trim() }))
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Stored form of a condition: type tag plus parameter object.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDef {
    pub kind: String,
    pub params: Value,
}

impl From<Condition> for ConditionDef {
    fn from(c: Condition) -> Self {
        ConditionDef {
            kind: c.kind().to_string(),
            params: c.params(),
        }
    }
}

/// Stored form of a filter, as supplied by the rule store.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDef {
    pub id: i64,
    pub name: String,
    pub rank: i32,
    pub conditions: Vec<ConditionDef>,
}

/// A named, ranked, all-must-pass rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub id: i64,
    pub name: String,
    pub rank: i32,
    pub conditions: Vec<Condition>,
}

impl Filter {
    /// Largest distance bound among this filter's distance conditions.
    pub fn max_distance_nm(&self) -> Option<f64> {
        self.conditions
            .iter()
            .filter_map(Condition::distance_limit)
            .reduce(f64::max)
    }

    /// True when every condition holds. Stops at the first failure.
    pub fn matches(&self, enc: &Encounter<'_>) -> bool {
        self.conditions.iter().all(|c| c.holds(enc))
    }
}

/// Configuration problems found while compiling a user's filters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleIssue {
    #[error("filter '{filter}' dropped: {reason}")]
    InvalidCondition { filter: String, reason: String },
    #[error("filter '{filter}' dropped: no 2d_distance or 3d_distance condition")]
    MissingDistanceCondition { filter: String },
    #[error("filter '{filter}' shares rank {rank} with an earlier filter")]
    DuplicateRank { filter: String, rank: i32 },
}

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

/// Notification text for a matched filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// The first filter that matched, with its rendered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterMatch<'r> {
    pub filter: &'r Filter,
    pub notification: Notification,
}

/// A user's usable filters, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    filters: Vec<Filter>,
    max_distance_nm: f64,
}

/// Parse stored definitions and build a rule set, collecting every issue.
pub fn compile(defs: Vec<FilterDef>) -> (RuleSet, Vec<RuleIssue>) {
    let mut issues = Vec::new();
    let mut filters = Vec::with_capacity(defs.len());

    for def in defs {
        let parsed: Result<Vec<Condition>> = def
            .conditions
            .iter()
            .map(|c| Condition::parse(&c.kind, &c.params))
            .collect();
        match parsed {
            Ok(conditions) => filters.push(Filter {
                id: def.id,
                name: def.name,
                rank: def.rank,
                conditions,
            }),
            Err(e) => issues.push(RuleIssue::InvalidCondition {
                filter: def.name,
                reason: e.to_string(),
            }),
        }
    }

    let (rules, more) = RuleSet::new(filters);
    issues.extend(more);
    (rules, issues)
}

impl RuleSet {
    /// Drop filters without a distance condition and order the rest by rank.
    ///
    /// Equal ranks keep their input order and are reported.
    pub fn new(filters: Vec<Filter>) -> (RuleSet, Vec<RuleIssue>) {
        let mut issues = Vec::new();
        let mut kept: Vec<Filter> = Vec::with_capacity(filters.len());

        for filter in filters {
            if filter.max_distance_nm().is_none() {
                issues.push(RuleIssue::MissingDistanceCondition {
                    filter: filter.name,
                });
                continue;
            }
            kept.push(filter);
        }

        kept.sort_by_key(|f| f.rank);
        for pair in kept.windows(2) {
            if pair[0].rank == pair[1].rank {
                issues.push(RuleIssue::DuplicateRank {
                    filter: pair[1].name.clone(),
                    rank: pair[1].rank,
                });
            }
        }

        let max_distance_nm = kept
            .iter()
            .filter_map(Filter::max_distance_nm)
            .fold(0.0, f64::max);

        (
            RuleSet {
                filters: kept,
                max_distance_nm,
            },
            issues,
        )
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Largest distance bound across all filters; bounds the feed radius.
    pub fn max_distance_nm(&self) -> f64 {
        self.max_distance_nm
    }

    /// First filter, in rank order, whose conditions all hold.
    pub fn evaluate(&self, enc: &Encounter<'_>) -> Option<FilterMatch<'_>> {
        self.filters
            .iter()
            .find(|f| f.matches(enc))
            .map(|filter| FilterMatch {
                filter,
                notification: render_notification(filter, enc),
            })
    }
}

/// Notification title is the filter name; the message describes the pass.
pub fn render_notification(filter: &Filter, enc: &Encounter<'_>) -> Notification {
    let bearing = enc.bearing_deg();
    Notification {
        title: filter.name.clone(),
        message: format!(
            "{} ({}) approaching: {:.2} nm away, {:.0} seconds to closest approach, \
             bearing {:.0} deg {}, {:.0} deg above the horizon",
            enc.aircraft.description,
            enc.aircraft.hex,
            enc.approach.distance_nm,
            enc.seconds_to_closest,
            bearing,
            geometry::compass_label(bearing),
            enc.angle_above_horizon(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AircraftSnapshot, Position3D};

    fn observer() -> Position3D {
        Position3D::new(40.0, -74.0, 0.0)
    }

    fn inbound() -> AircraftSnapshot {
        AircraftSnapshot {
            hex: "a4f2b1".into(),
            position: Position3D::new(40.05, -74.0, 5000.0),
            ground_speed_kts: 300.0,
            track_deg: 180.0,
            description: "AIRBUS A-320".into(),
        }
    }

    fn filter(id: i64, name: &str, rank: i32, conditions: Vec<Condition>) -> Filter {
        Filter {
            id,
            name: name.into(),
            rank,
            conditions,
        }
    }

    fn def(id: i64, name: &str, rank: i32, conditions: &[(&str, Value)]) -> FilterDef {
        FilterDef {
            id,
            name: name.into(),
            rank,
            conditions: conditions
                .iter()
                .map(|(kind, params)| ConditionDef {
                    kind: kind.to_string(),
                    params: params.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(
            Condition::parse("3d_distance", &json!({"max_distance": 5})).unwrap(),
            Condition::Distance3d { max_distance: 5.0 }
        );
        assert_eq!(
            Condition::parse("2d_distance", &json!({"max_distance": "2.5"})).unwrap(),
            Condition::Distance2d { max_distance: 2.5 }
        );
        assert_eq!(
            Condition::parse("angle_above_horizon", &json!({"min_angle": 30})).unwrap(),
            Condition::AngleAboveHorizon { min_angle: 30.0 }
        );
        assert_eq!(
            Condition::parse("altitude_below", &json!({"max_altitude": 3000})).unwrap(),
            Condition::AltitudeBelow { max_altitude: 3000.0 }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = Condition::parse("registration_number", &json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown condition type"));
    }

    #[test]
    fn test_parse_rejects_bad_threshold() {
        assert!(Condition::parse("3d_distance", &json!({})).is_err());
        assert!(Condition::parse("3d_distance", &json!({"max_distance": "far"})).is_err());
        assert!(Condition::parse("3d_distance", &json!({"max_distance": -1})).is_err());
        assert!(Condition::parse("angle_above_horizon", &json!({"max_distance": 5})).is_err());
    }

    #[test]
    fn test_params_roundtrip_through_def() {
        let c = Condition::AngleAboveHorizon { min_angle: 12.5 };
        let d = ConditionDef::from(c);
        assert_eq!(d.kind, "angle_above_horizon");
        assert_eq!(Condition::parse(&d.kind, &d.params).unwrap(), c);
    }

    #[test]
    fn test_condition_shorthand() {
        assert_eq!(
            "3d_distance=5".parse::<Condition>().unwrap(),
            Condition::Distance3d { max_distance: 5.0 }
        );
        assert_eq!(
            "angle_above_horizon = 12.5".parse::<Condition>().unwrap(),
            Condition::AngleAboveHorizon { min_angle: 12.5 }
        );
        assert!("altitude_below".parse::<Condition>().is_err());
        assert!("aircraft_type=B738".parse::<Condition>().is_err());
        assert!("2d_distance=far".parse::<Condition>().is_err());
    }

    #[test]
    fn test_condition_type_tag() {
        let c: Condition =
            serde_json::from_value(json!({"type": "2d_distance", "max_distance": 4.0})).unwrap();
        assert_eq!(c, Condition::Distance2d { max_distance: 4.0 });
        let v = serde_json::to_value(Condition::AltitudeBelow { max_altitude: 2000.0 }).unwrap();
        assert_eq!(v["type"], "altitude_below");
    }

    #[test]
    fn test_overhead_pass_matches_distance_and_angle() {
        let ac = inbound();
        let enc = Encounter::compute(observer(), &ac, 3.0);
        let (rules, issues) = RuleSet::new(vec![filter(
            1,
            "Overhead",
            0,
            vec![
                Condition::Distance3d { max_distance: 5.0 },
                Condition::AngleAboveHorizon { min_angle: 10.0 },
            ],
        )]);
        assert!(issues.is_empty());

        let hit = rules.evaluate(&enc).expect("should match");
        assert_eq!(hit.filter.name, "Overhead");
        assert_eq!(hit.notification.title, "Overhead");
        assert!(hit.notification.message.contains("AIRBUS A-320 (a4f2b1)"));
        assert!(hit.notification.message.contains("deg N,"));
        assert!(hit.notification.message.contains("36 seconds"));
    }

    #[test]
    fn test_first_match_wins() {
        let ac = inbound();
        let enc = Encounter::compute(observer(), &ac, 3.0);
        // Listed out of order on purpose: rank decides, not position
        let (rules, _) = RuleSet::new(vec![
            filter(1, "Wide", 5, vec![Condition::Distance3d { max_distance: 10.0 }]),
            filter(2, "Close", 1, vec![Condition::Distance3d { max_distance: 2.0 }]),
        ]);
        assert_eq!(rules.evaluate(&enc).unwrap().filter.name, "Close");
    }

    #[test]
    fn test_falls_through_to_lower_rank() {
        let ac = inbound();
        let enc = Encounter::compute(observer(), &ac, 3.0);
        let (rules, _) = RuleSet::new(vec![
            filter(
                1,
                "Low only",
                1,
                vec![
                    Condition::Distance3d { max_distance: 5.0 },
                    Condition::AltitudeBelow { max_altitude: 1000.0 },
                ],
            ),
            filter(2, "Anything near", 2, vec![Condition::Distance2d { max_distance: 1.0 }]),
        ]);
        assert_eq!(rules.evaluate(&enc).unwrap().filter.name, "Anything near");
    }

    #[test]
    fn test_no_match() {
        let ac = inbound();
        let enc = Encounter::compute(observer(), &ac, 3.0);
        let (rules, _) = RuleSet::new(vec![filter(
            1,
            "Steep",
            0,
            vec![
                Condition::Distance3d { max_distance: 0.5 },
                Condition::AngleAboveHorizon { min_angle: 10.0 },
            ],
        )]);
        assert!(rules.evaluate(&enc).is_none());
    }

    #[test]
    fn test_thresholds_inclusive_altitude_strict() {
        let ac = inbound();
        let enc = Encounter::compute(observer(), &ac, 3.0);
        let exact = enc.approach.distance_nm;
        assert!(Condition::Distance3d { max_distance: exact }.holds(&enc));
        let angle = enc.angle_above_horizon();
        assert!(Condition::AngleAboveHorizon { min_angle: angle }.holds(&enc));
        assert!(!Condition::AltitudeBelow { max_altitude: 5000.0 }.holds(&enc));
        assert!(Condition::AltitudeBelow { max_altitude: 5000.1 }.holds(&enc));
    }

    #[test]
    fn test_altitude_uses_current_not_predicted() {
        // Closest point is at the same altitude here, so drive the check
        // from a snapshot whose altitude differs from the approach point.
        let ac = inbound();
        let mut enc = Encounter::compute(observer(), &ac, 3.0);
        enc.approach.point.altitude_ft = 500.0;
        assert!(!Condition::AltitudeBelow { max_altitude: 1000.0 }.holds(&enc));
    }

    #[test]
    fn test_filter_without_distance_is_rejected() {
        let (rules, issues) = RuleSet::new(vec![
            filter(1, "Low", 0, vec![Condition::AltitudeBelow { max_altitude: 2000.0 }]),
            filter(2, "Near", 1, vec![Condition::Distance2d { max_distance: 3.0 }]),
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.filters()[0].name, "Near");
        assert_eq!(rules.max_distance_nm(), 3.0);
        assert_eq!(
            issues,
            vec![RuleIssue::MissingDistanceCondition {
                filter: "Low".into()
            }]
        );
    }

    #[test]
    fn test_max_distance_across_filters() {
        let (rules, _) = RuleSet::new(vec![
            filter(
                1,
                "A",
                0,
                vec![
                    Condition::Distance2d { max_distance: 2.0 },
                    Condition::Distance3d { max_distance: 4.0 },
                ],
            ),
            filter(2, "B", 1, vec![Condition::Distance3d { max_distance: 7.5 }]),
        ]);
        assert_eq!(rules.max_distance_nm(), 7.5);
    }

    #[test]
    fn test_duplicate_rank_warns_and_keeps_order() {
        let (rules, issues) = RuleSet::new(vec![
            filter(1, "First", 3, vec![Condition::Distance3d { max_distance: 5.0 }]),
            filter(2, "Second", 3, vec![Condition::Distance3d { max_distance: 5.0 }]),
        ]);
        assert_eq!(rules.filters()[0].name, "First");
        assert_eq!(rules.filters()[1].name, "Second");
        assert_eq!(
            issues,
            vec![RuleIssue::DuplicateRank {
                filter: "Second".into(),
                rank: 3
            }]
        );
    }

    #[test]
    fn test_compile_flags_unknown_kind_and_keeps_others() {
        let (rules, issues) = compile(vec![
            def(1, "Typed", 0, &[("aircraft_type", json!({"types": "B738"}))]),
            def(2, "Near", 1, &[("3d_distance", json!({"max_distance": 4}))]),
            def(3, "Empty", 2, &[]),
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(issues.len(), 2);
        assert!(matches!(&issues[0], RuleIssue::InvalidCondition { filter, .. } if filter == "Typed"));
        assert!(
            matches!(&issues[1], RuleIssue::MissingDistanceCondition { filter } if filter == "Empty")
        );
    }

    #[test]
    fn test_compile_all_invalid_is_empty() {
        let (rules, issues) = compile(vec![def(
            1,
            "Low",
            0,
            &[("altitude_below", json!({"max_altitude": 1500}))],
        )]);
        assert!(rules.is_empty());
        assert_eq!(rules.max_distance_nm(), 0.0);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_condition_display() {
        assert_eq!(
            Condition::Distance3d { max_distance: 5.0 }.to_string(),
            "3D distance <= 5 nm"
        );
        assert_eq!(
            Condition::AltitudeBelow { max_altitude: 3000.0 }.to_string(),
            "altitude < 3000 ft"
        );
    }
}
