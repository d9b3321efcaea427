//! Durable `ConnectionSession` rows.
//!
//! The in-memory registry is authoritative for liveness; these rows exist
//! for analytics and recording linkage and survive the session itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSessionStatus {
    Opening,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSession {
    pub id: String,
    pub connection_id: String,
    pub user_id: String,
    pub protocol_id: String,
    pub status: ConnectionSessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait ConnectionSessionStore: Send + Sync {
    async fn upsert(&self, session: ConnectionSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ConnectionSession>>;
    async fn mark_closed(&self, id: &str, ended_at: DateTime<Utc>) -> Result<()>;
    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<ConnectionSession>>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryConnectionSessionStore {
    rows: parking_lot::RwLock<HashMap<String, ConnectionSession>>,
}

impl MemoryConnectionSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConnectionSessionStore for MemoryConnectionSessionStore {
    async fn upsert(&self, session: ConnectionSession) -> Result<()> {
        self.rows.write().insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ConnectionSession>> {
        Ok(self.rows.read().get(id).cloned())
    }

    async fn mark_closed(&self, id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.write();
        let session = rows
            .get_mut(id)
            .ok_or_else(|| Error::not_found("connection session"))?;
        session.status = ConnectionSessionStatus::Closed;
        session.ended_at = Some(ended_at);
        Ok(())
    }

    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<ConnectionSession>> {
        let mut out: Vec<ConnectionSession> = self
            .rows
            .read()
            .values()
            .filter(|s| s.connection_id == connection_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }
}
