//! In-memory authoritative registry of live sessions.
//!
//! One mutex guards both indexes (`sessions[id]` and
//! `user_conn[(user, connection)]`). Broadcasts are collected under the lock
//! and emitted after it is released, so a slow hub subscriber can never
//! extend the registry's critical section. Records are copied on ingress and
//! egress; callers never see shared state.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use hg_drivers::DriverCapabilities;

use crate::realtime::frame::{streams, ServerFrame};
use crate::realtime::EventSink;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live session. At most one record exists per (user, connection) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionRecord {
    pub id: String,
    pub connection_id: String,
    pub connection_name: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub protocol_id: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DriverCapabilities>,
}

/// Filter for [`ActiveSessionRegistry::list_active`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Match sessions owned by this user.
    pub user_id: Option<String>,
    /// Also match sessions belonging to these teams.
    pub team_ids: Vec<String>,
    /// Administrative view: everything.
    pub include_all: bool,
}

/// Why a registration was rejected.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("invalid session record: {0}")]
    Invalid(String),
    #[error("session {0} is already registered")]
    AlreadyRegistered(String),
    #[error("an active session {existing_id} already exists for this user and connection")]
    ActiveSessionExists {
        existing_id: String,
        user_id: String,
        connection_id: String,
    },
}

impl From<RegisterError> for hg_domain::Error {
    fn from(err: RegisterError) -> Self {
        match &err {
            RegisterError::Invalid(_) => hg_domain::Error::validation(err.to_string()),
            RegisterError::AlreadyRegistered(_) | RegisterError::ActiveSessionExists { .. } => {
                hg_domain::Error::conflict(err.to_string())
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Indexes {
    sessions: HashMap<String, ActiveSessionRecord>,
    /// (user_id, connection_id) → session id. Enforces the concurrency cap.
    user_conn: HashMap<(String, String), String>,
}

pub struct ActiveSessionRegistry {
    inner: Mutex<Indexes>,
    events: std::sync::Arc<dyn EventSink>,
}

impl ActiveSessionRegistry {
    pub fn new(events: std::sync::Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Indexes::default()),
            events,
        }
    }

    /// Register a live session and broadcast `session.opened`.
    pub fn register(&self, mut record: ActiveSessionRecord) -> Result<(), RegisterError> {
        for (value, field) in [
            (&record.id, "id"),
            (&record.connection_id, "connection_id"),
            (&record.user_id, "user_id"),
            (&record.protocol_id, "protocol_id"),
        ] {
            if value.trim().is_empty() {
                return Err(RegisterError::Invalid(format!("{field} must not be empty")));
            }
        }

        let now = Utc::now();
        if record.started_at.timestamp() == 0 {
            record.started_at = now;
        }
        if record.last_seen_at.timestamp() == 0 {
            record.last_seen_at = now;
        }

        let opened = {
            let mut inner = self.inner.lock();
            if inner.sessions.contains_key(&record.id) {
                return Err(RegisterError::AlreadyRegistered(record.id));
            }
            let pair = (record.user_id.clone(), record.connection_id.clone());
            if let Some(existing_id) = inner.user_conn.get(&pair) {
                return Err(RegisterError::ActiveSessionExists {
                    existing_id: existing_id.clone(),
                    user_id: pair.0,
                    connection_id: pair.1,
                });
            }
            inner.user_conn.insert(pair, record.id.clone());
            inner.sessions.insert(record.id.clone(), record.clone());
            record
        };

        tracing::info!(
            session_id = %opened.id,
            connection_id = %opened.connection_id,
            user_id = %opened.user_id,
            protocol = %opened.protocol_id,
            "session registered"
        );
        // Subscribers get their own copy of the record.
        self.events.emit(
            streams::CONNECTION_SESSIONS,
            ServerFrame::new(
                streams::CONNECTION_SESSIONS,
                "session.opened",
                serde_json::to_value(&opened).unwrap_or_default(),
            ),
        );
        Ok(())
    }

    /// Remove a session. Broadcasts `session.closed` when it was present.
    pub fn unregister(&self, id: &str) {
        let removed = {
            let mut inner = self.inner.lock();
            let record = inner.sessions.remove(id);
            if let Some(record) = &record {
                inner
                    .user_conn
                    .remove(&(record.user_id.clone(), record.connection_id.clone()));
            }
            record
        };

        if let Some(record) = removed {
            tracing::info!(session_id = %id, "session unregistered");
            self.emit_closed(&record, None);
        }
    }

    /// Record liveness. Returns false for an unknown session.
    pub fn heartbeat(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(record) => {
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Sessions visible under `filter`, newest activity first. Returned
    /// records are copies.
    pub fn list_active(&self, filter: &ListFilter) -> Vec<ActiveSessionRecord> {
        let inner = self.inner.lock();
        let mut out: Vec<ActiveSessionRecord> = inner
            .sessions
            .values()
            .filter(|record| {
                filter.include_all
                    || filter
                        .user_id
                        .as_ref()
                        .is_some_and(|user| user == &record.user_id)
                    || record
                        .team_id
                        .as_ref()
                        .is_some_and(|team| filter.team_ids.contains(team))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        out
    }

    /// O(1) concurrency-cap probe.
    pub fn has_active_session(&self, user_id: &str, connection_id: &str) -> bool {
        self.inner
            .lock()
            .user_conn
            .contains_key(&(user_id.to_string(), connection_id.to_string()))
    }

    pub fn count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Remove sessions whose last heartbeat is older than `grace` and
    /// broadcast `session.closed` with `reason:"timeout"` for each.
    /// A non-positive grace is a no-op.
    pub fn cleanup_stale(&self, grace: Duration) -> usize {
        if grace.is_zero() {
            return 0;
        }
        let threshold = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());

        let stale = {
            let mut inner = self.inner.lock();
            let victims: Vec<String> = inner
                .sessions
                .values()
                .filter(|record| record.last_seen_at < threshold)
                .map(|record| record.id.clone())
                .collect();
            victims
                .into_iter()
                .filter_map(|id| {
                    let record = inner.sessions.remove(&id)?;
                    inner
                        .user_conn
                        .remove(&(record.user_id.clone(), record.connection_id.clone()));
                    Some(record)
                })
                .collect::<Vec<_>>()
        };

        let removed = stale.len();
        for record in stale {
            tracing::warn!(session_id = %record.id, "stale session cleaned up");
            self.emit_closed(&record, Some("timeout"));
        }
        removed
    }

    fn emit_closed(&self, record: &ActiveSessionRecord, reason: Option<&str>) {
        let mut data = serde_json::json!({
            "id": record.id,
            "connection_id": record.connection_id,
            "user_id": record.user_id,
        });
        if let Some(reason) = reason {
            data["reason"] = serde_json::Value::String(reason.to_string());
        }
        self.events.emit(
            streams::CONNECTION_SESSIONS,
            ServerFrame::new(streams::CONNECTION_SESSIONS, "session.closed", data),
        );
    }
}
