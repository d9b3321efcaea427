//! HTTP surface: JSON envelope, authentication helper, and the router.
//!
//! Every response uses the envelope
//! `{success, data?, error?{code,message}, meta?}`; errors map through
//! [`hg_domain::Error::status`] so handlers never pick status codes by hand.

pub mod health;
pub mod sessions;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use hg_auth::Claims;
use hg_domain::Error;

use crate::realtime::ws::realtime_ws;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `{"success":true,"data":...}`
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

/// Paginated variant with `meta`.
pub fn ok_paged<T: Serialize>(
    data: T,
    page: u64,
    per_page: u64,
    total: u64,
) -> Json<serde_json::Value> {
    let total_pages = if per_page == 0 {
        0
    } else {
        total.div_ceil(per_page)
    };
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "meta": {
            "page": page,
            "per_page": per_page,
            "total": total,
            "total_pages": total_pages,
        }
    }))
}

/// `{"success":false,"error":{code,message}}` with the kind's status.
pub fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": { "code": err.code(), "message": err.message() },
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate the bearer token on a request.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, Error> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    state.jwt.validate(token)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/protocols", get(sessions::list_protocols))
        .route("/ws", get(realtime_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
