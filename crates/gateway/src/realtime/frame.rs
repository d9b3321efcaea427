//! Wire frames for the realtime channel.
//!
//! Server → client: `{stream, event, data, meta?}`.
//! Client → server: `{action, streams[]}` with action ∈
//! {subscribe, unsubscribe, ping}.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// Well-known stream names.
pub mod streams {
    pub const NOTIFICATIONS: &str = "notifications";
    pub const CONNECTION_SESSIONS: &str = "connection.sessions";
    pub const SSH_TERMINAL: &str = "ssh.terminal";
    pub const SSH_SFTP: &str = "ssh.sftp";
}

/// Stream names are matched lowercase-trimmed everywhere.
pub fn normalize_stream(stream: &str) -> String {
    stream.trim().to_ascii_lowercase()
}

/// A frame pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerFrame {
    pub stream: String,
    pub event: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ServerFrame {
    pub fn new(stream: &str, event: &str, data: serde_json::Value) -> Self {
        Self {
            stream: normalize_stream(stream),
            event: event.to_string(),
            data,
            meta: None,
        }
    }

    /// The reply to a client ping.
    pub fn pong() -> Self {
        Self {
            stream: String::new(),
            event: "pong".to_string(),
            data: serde_json::Value::Null,
            meta: None,
        }
    }

    /// A terminal data frame: payload base64-encoded, channel is `stdout`
    /// or `stderr`.
    pub fn terminal_data(stream: &str, session_id: &str, payload: &[u8], channel: &str) -> Self {
        Self::new(
            stream,
            "data",
            serde_json::json!({
                "session_id": session_id,
                "payload": BASE64.encode(payload),
                "encoding": "base64",
                "channel": channel,
            }),
        )
    }
}

/// What a client may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// A client control frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlFrame {
    pub action: ControlAction,
    #[serde(default)]
    pub streams: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn control_frame_parses() {
        let frame: ControlFrame = serde_json::from_str(
            r#"{"action":"subscribe","streams":["notifications","ssh.terminal"]}"#,
        )
        .unwrap();
        assert_eq!(frame.action, ControlAction::Subscribe);
        assert_eq!(frame.streams, vec!["notifications", "ssh.terminal"]);
    }

    #[test]
    fn ping_frame_needs_no_streams() {
        let frame: ControlFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(frame.action, ControlAction::Ping);
        assert!(frame.streams.is_empty());
    }

    #[test]
    fn pong_has_empty_stream() {
        let json = serde_json::to_value(ServerFrame::pong()).unwrap();
        assert_eq!(json["stream"], "");
        assert_eq!(json["event"], "pong");
    }

    #[test]
    fn stream_names_normalize() {
        assert_eq!(normalize_stream("  SSH.Terminal "), "ssh.terminal");
    }

    #[test]
    fn terminal_data_shape() {
        let frame =
            ServerFrame::terminal_data(streams::SSH_TERMINAL, "s1", b"ls -la\n", "stdout");
        assert_eq!(frame.event, "data");
        assert_eq!(frame.data["encoding"], "base64");
        assert_eq!(frame.data["channel"], "stdout");
        assert_eq!(frame.data["session_id"], "s1");
        let payload = frame.data["payload"].as_str().unwrap();
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(payload)
                .unwrap(),
            b"ls -la\n"
        );
    }
}
