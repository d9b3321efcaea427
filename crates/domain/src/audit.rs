//! Audit records and the append-only store port.
//!
//! Every permission-checked operation appends one record. Stores are
//! append-only from the service's point of view; the only mutation is the
//! retention purge driven by the maintenance scheduler.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
    Error,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_name: String,
    /// Dotted action identifier, e.g. `session.launch` or `identity.delete`.
    pub action: String,
    /// Resource the action targeted, e.g. `connection:42`.
    pub resource: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only audit storage. Relational backends implement this at the
/// boundary; [`MemoryAuditStore`] backs tests and single-node deploys.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;

    /// Delete records older than `cutoff`. Returns the number removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Most recent records, newest first, capped at `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}

/// In-memory audit store.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: parking_lot::RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let records = self.records.read();
        let mut out: Vec<AuditRecord> = records.iter().rev().take(limit).cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }
}
