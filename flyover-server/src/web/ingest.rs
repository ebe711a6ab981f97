//! OwnTracks HTTP ingest. Phones POST their location here.
//!
//! The user is identified by the `X-Limit-U` header (their email). Only
//! `location` messages are stored; everything else is acknowledged with 204.
//! OwnTracks expects a JSON array of friends' locations in reply, which is
//! always empty.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, error};

use flyover_core::types::Position3D;

use crate::web::AppState;

pub const USER_HEADER: &str = "x-limit-u";
const FEET_PER_METRE: f64 = 3.28084;

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

/// Extract a location from an OwnTracks `location` message. Altitude is in
/// metres and defaults to 0 when absent.
fn parse_location(body: &Value) -> Option<(Position3D, Option<f64>)> {
    let lat = body.get("lat")?.as_f64()?;
    let lon = body.get("lon")?.as_f64()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    let alt_m = body.get("alt").and_then(Value::as_f64).unwrap_or(0.0);
    let tst = body.get("tst").and_then(Value::as_f64);
    Some((Position3D::new(lat, lon, alt_m * FEET_PER_METRE), tst))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /pub (OwnTracks HTTP mode)
pub async fn api_publish_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if body.get("_type").and_then(Value::as_str) != Some("location") {
        return StatusCode::NO_CONTENT.into_response();
    }

    let Some(email) = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|e| !e.is_empty())
    else {
        return bad_request("missing X-Limit-U header");
    };

    let Some((location, tst)) = parse_location(&body) else {
        return bad_request("location needs numeric lat and lon");
    };
    let timestamp = tst.unwrap_or_else(crate::now);

    match state.store.report_location(email, &location, timestamp) {
        Ok(true) => {
            debug!(email, lat = location.lat, lon = location.lon, "location updated");
            (StatusCode::OK, Json(json!([]))).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown user" })),
        )
            .into_response(),
        Err(e) => {
            error!("location not stored: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/health
pub async fn api_health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.store.lock() {
        Ok(db) => {
            let stats = db.stats();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "users": stats.users,
                    "located_users": stats.located_users,
                })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "error": e.to_string() })),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::db::{Database, SqliteStore};

    fn test_state() -> Arc<AppState> {
        let mut db = Database::open_memory().unwrap();
        db.add_user("walker@example.com", Some("walker-alerts")).unwrap();
        Arc::new(AppState {
            store: Arc::new(SqliteStore::new(db)),
        })
    }

    fn publish(email: Option<&str>, body: &str) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/pub")
            .header("content-type", "application/json");
        if let Some(email) = email {
            req = req.header("X-Limit-U", email);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_publish_location_stores_feet() {
        let state = test_state();
        let app = crate::web::build_router(state.clone());

        let response = app
            .oneshot(publish(
                Some("walker@example.com"),
                r#"{"_type":"location","lat":40.0,"lon":-74.0,"alt":100,"tst":1700000000}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!([]));

        let users = state.store.lock().unwrap().located_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].location.lat, 40.0);
        assert!((users[0].location.altitude_ft - 328.084).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_non_location_message_is_no_content() {
        let state = test_state();
        let app = crate::web::build_router(state.clone());

        let response = app
            .oneshot(publish(
                Some("walker@example.com"),
                r#"{"_type":"transition","event":"enter"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.store.lock().unwrap().located_users().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_location_message_without_header() {
        let app = crate::web::build_router(test_state());
        let response = app
            .oneshot(publish(None, r#"{"_type":"waypoints","waypoints":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_missing_user_header() {
        let app = crate::web::build_router(test_state());
        let response = app
            .oneshot(publish(None, r#"{"_type":"location","lat":40.0,"lon":-74.0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let app = crate::web::build_router(test_state());
        let response = app
            .oneshot(publish(
                Some("stranger@example.com"),
                r#"{"_type":"location","lat":40.0,"lon":-74.0}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_location_without_coordinates() {
        let app = crate::web::build_router(test_state());
        let response = app
            .oneshot(publish(
                Some("walker@example.com"),
                r#"{"_type":"location","lat":"north"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let app = crate::web::build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["users"], 1);
    }

    #[test]
    fn test_parse_location_defaults_altitude() {
        let (pos, tst) = parse_location(&json!({"lat": 51.5, "lon": -0.1})).unwrap();
        assert_eq!(pos.altitude_ft, 0.0);
        assert!(tst.is_none());
        assert!(parse_location(&json!({"lat": 95.0, "lon": 0.0})).is_none());
    }
}
