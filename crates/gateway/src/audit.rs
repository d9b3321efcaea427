//! Audit service: shapes and appends audit records.
//!
//! Auditing must never fail the operation it records, so append errors are
//! logged and swallowed here.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use hg_domain::audit::{AuditRecord, AuditResult, AuditStore};

/// Request-scoped fields captured at the boundary.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Append one record with the server's timestamp.
    pub async fn record(
        &self,
        actor_id: &str,
        actor_name: &str,
        action: &str,
        resource: &str,
        result: AuditResult,
        meta: RequestMeta,
        metadata: BTreeMap<String, serde_json::Value>,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            actor_id: actor_id.to_string(),
            actor_name: actor_name.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            result,
            ip: meta.ip,
            user_agent: meta.user_agent,
            metadata,
        };
        tracing::debug!(
            actor = %record.actor_id,
            action = %record.action,
            resource = %record.resource,
            result = ?record.result,
            "audit"
        );
        if let Err(err) = self.store.append(record).await {
            tracing::warn!(error = %err, "audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_domain::audit::MemoryAuditStore;

    #[tokio::test]
    async fn record_appends_with_request_meta() {
        let store = Arc::new(MemoryAuditStore::new());
        let audit = AuditService::new(store.clone());

        audit
            .record(
                "u1",
                "alice",
                "session.launch",
                "connection:42",
                AuditResult::Success,
                RequestMeta {
                    ip: Some("203.0.113.9".into()),
                    user_agent: Some("hopgate-web".into()),
                },
                BTreeMap::new(),
            )
            .await;

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "session.launch");
        assert_eq!(recent[0].ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(recent[0].result, AuditResult::Success);
    }
}
