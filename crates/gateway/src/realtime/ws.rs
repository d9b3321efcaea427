//! WebSocket endpoint for the realtime channel.
//!
//! Flow:
//! 1. Client connects to `/ws?token=<access-token>&streams=a,b`
//! 2. The origin is checked (same-host and loopback allowed) and the access
//!    token validated
//! 3. The hub registers the connection with its initial streams
//! 4. Two loops per connection: the read loop parses control frames under a
//!    pong deadline, the write loop drains the send queue and emits pings

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use super::frame::{ControlAction, ControlFrame, ServerFrame};
use crate::state::AppState;

/// How long to wait for any inbound traffic before declaring the peer dead.
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Ping cadence; keeps comfortably inside the pong deadline.
const PING_PERIOD: Duration = Duration::from_millis(54_000);
/// Per-write deadline.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Maximum inbound message size.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Access token; the `Authorization: Bearer` header also works.
    pub token: Option<String>,
    /// Comma-separated initial subscription list.
    pub streams: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws — upgrade to the realtime channel.
pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !origin_allowed(&headers, &state.config.server.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let token = bearer_token(&headers)
        .or(query.token.as_deref())
        .unwrap_or("");
    let claims = match state.jwt.validate(token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "realtime upgrade rejected");
            return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
        }
    };

    let initial = parse_streams(query.streams.as_deref());
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, claims.sub, initial))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String, initial: Vec<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (conn, mut outbound) = state.hub.register(&user_id, None, &initial);
    tracing::info!(user_id = %user_id, streams = initial.len(), "realtime client connected");

    // Write loop: drain the send queue, tick pings.
    let hub_for_writer = state.hub.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_PERIOD);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // The first tick fires immediately; skip it.

        loop {
            let message = tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => Message::Text(json),
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping unserialisable frame");
                            continue;
                        }
                    },
                    // Queue closed: the hub evicted us or the reader cleaned up.
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };

            let write = tokio::time::timeout(WRITE_WAIT, ws_sink.send(message)).await;
            if !matches!(write, Ok(Ok(()))) {
                hub_for_writer.record_failure();
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // Read loop: enforce the pong deadline, parse control frames.
    loop {
        let next = tokio::time::timeout(PONG_WAIT, ws_stream.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(_) => break,
            Err(_deadline) => {
                tracing::debug!(user_id = %user_id, "realtime client missed pong deadline");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ControlFrame>(&text) {
                Ok(frame) => handle_control(&state, conn, frame),
                Err(_) => {
                    tracing::debug!(user_id = %user_id, "ignoring unparseable control frame");
                }
            },
            Message::Close(_) => break,
            // Pong (and any other traffic) refreshes the read deadline by
            // reaching this point before the next timeout window starts.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {}
        }
    }

    // Cleanup, exactly once per connection: subscriptions go, the send
    // queue closes, the writer shuts the socket.
    state.hub.remove(conn);
    writer.abort();
    tracing::info!(user_id = %user_id, "realtime client disconnected");
}

fn handle_control(state: &AppState, conn: super::hub::ConnId, frame: ControlFrame) {
    match frame.action {
        ControlAction::Subscribe => state.hub.subscribe(conn, &frame.streams),
        ControlAction::Unsubscribe => state.hub.unsubscribe(conn, &frame.streams),
        ControlAction::Ping => state.hub.send_to_conn(conn, ServerFrame::pong()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn parse_streams(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Allow same-host and loopback origins plus anything explicitly configured.
/// Requests without an Origin header (non-browser clients) pass.
fn origin_allowed(headers: &HeaderMap, extra: &[String]) -> bool {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        return true;
    };
    if extra.iter().any(|allowed| allowed == origin) {
        return true;
    }

    let origin_host = match host_of(origin) {
        Some(host) => host,
        None => return false,
    };
    if is_loopback(&origin_host) {
        return true;
    }

    headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|host| hostname_only(host) == origin_host)
        .unwrap_or(false)
}

/// Hostname (no port) of an origin like `https://gate.example:8443`.
fn host_of(origin: &str) -> Option<String> {
    let after_scheme = origin.split_once("://").map(|(_, rest)| rest)?;
    let authority = after_scheme.split('/').next()?;
    Some(hostname_only(authority))
}

fn hostname_only(authority: &str) -> String {
    // Bracketed IPv6 keeps its brackets so `[::1]` compares equal.
    if let Some(end) = authority.find(']') {
        return authority[..=end].to_ascii_lowercase();
    }
    authority
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_ascii_lowercase()
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn missing_origin_is_allowed() {
        assert!(origin_allowed(&headers(&[("host", "gate.example")]), &[]));
    }

    #[test]
    fn loopback_origins_are_allowed() {
        for origin in [
            "http://localhost:3000",
            "http://127.0.0.1:8443",
            "http://[::1]:8443",
        ] {
            assert!(
                origin_allowed(
                    &headers(&[("origin", origin), ("host", "gate.example")]),
                    &[]
                ),
                "{origin} should pass"
            );
        }
    }

    #[test]
    fn same_host_origin_is_allowed() {
        let h = headers(&[
            ("origin", "https://gate.example:8443"),
            ("host", "gate.example:8443"),
        ]);
        assert!(origin_allowed(&h, &[]));
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let h = headers(&[
            ("origin", "https://evil.example"),
            ("host", "gate.example"),
        ]);
        assert!(!origin_allowed(&h, &[]));
    }

    #[test]
    fn configured_origin_is_allowed() {
        let h = headers(&[
            ("origin", "https://app.example"),
            ("host", "gate.example"),
        ]);
        assert!(origin_allowed(&h, &["https://app.example".to_string()]));
    }

    #[test]
    fn malformed_origin_is_rejected() {
        let h = headers(&[("origin", "not-a-url"), ("host", "gate.example")]);
        assert!(!origin_allowed(&h, &[]));
    }

    #[test]
    fn stream_list_parses() {
        assert_eq!(
            parse_streams(Some("notifications, ssh.terminal ,")),
            vec!["notifications".to_string(), "ssh.terminal".to_string()]
        );
        assert!(parse_streams(None).is_empty());
    }
}
