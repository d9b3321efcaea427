//! Active-session and protocol catalog endpoints.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api::{authenticate, error_response, ok};
use crate::sessions::ListFilter;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    /// Administrative view across all users.
    #[serde(default)]
    pub all: bool,
    /// Comma-separated team IDs to include.
    #[serde(default)]
    pub teams: Option<String>,
}

/// GET /api/sessions — live sessions visible to the caller.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let claims = match authenticate(&state, &headers) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };

    let team_ids: Vec<String> = query
        .teams
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let filter = ListFilter {
        user_id: Some(claims.sub),
        team_ids,
        include_all: query.all,
    };
    ok(state.active_sessions.list_active(&filter)).into_response()
}

/// GET /api/protocols — the browsable protocol catalog.
pub async fn list_protocols(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authenticate(&state, &headers) {
        return error_response(&err);
    }
    ok(state.protocols.describe_all()).into_response()
}
