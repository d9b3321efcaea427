//! Identity records (sealed credential sets) and their storage port.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named, sealed credential set owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub user_id: String,
    pub driver_id: String,
    pub name: String,
    /// `base64(nonce ‖ ciphertext)` of the credential JSON.
    pub sealed_payload: String,
    /// Key-metadata version the payload was sealed under.
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A grant of an identity to another principal (user or team).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityShare {
    pub identity_id: String,
    /// `user:<id>` or `team:<id>`.
    pub principal: String,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity CRUD. `delete` refuses while any connection still references the
/// identity.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert(&self, identity: IdentityRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<IdentityRecord>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<IdentityRecord>>;
}

/// Maintenance port: sweep shares whose owning identity row is gone.
#[async_trait::async_trait]
pub trait VaultStore: Send + Sync {
    /// Remove orphaned shares. Returns the number removed.
    async fn purge_orphans(&self) -> Result<u64>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    identities: HashMap<String, IdentityRecord>,
    shares: Vec<IdentityShare>,
    /// connection ID → identity ID links, used to refuse deletes.
    references: HashSet<(String, String)>,
}

/// In-memory identity store for tests and single-node deploys.
#[derive(Default)]
pub struct MemoryIdentityStore {
    inner: parking_lot::RwLock<Inner>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `connection_id` uses `identity_id`.
    pub fn link_connection(&self, connection_id: &str, identity_id: &str) {
        self.inner
            .write()
            .references
            .insert((connection_id.to_string(), identity_id.to_string()));
    }

    pub fn unlink_connection(&self, connection_id: &str, identity_id: &str) {
        self.inner
            .write()
            .references
            .remove(&(connection_id.to_string(), identity_id.to_string()));
    }

    pub fn add_share(&self, share: IdentityShare) {
        self.inner.write().shares.push(share);
    }

    pub fn share_count(&self) -> usize {
        self.inner.read().shares.len()
    }
}

#[async_trait::async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, identity: IdentityRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.identities.contains_key(&identity.id) {
            return Err(Error::conflict(format!(
                "identity {} already exists",
                identity.id
            )));
        }
        inner.identities.insert(identity.id.clone(), identity);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.inner.read().identities.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.references.iter().any(|(_, ident)| ident == id) {
            return Err(Error::conflict(format!(
                "identity {id} is still referenced by a connection"
            )));
        }
        inner
            .identities
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("identity"))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<IdentityRecord>> {
        let inner = self.inner.read();
        let mut out: Vec<IdentityRecord> = inner
            .identities
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl VaultStore for MemoryIdentityStore {
    async fn purge_orphans(&self) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.shares.len();
        let live: HashSet<String> = inner.identities.keys().cloned().collect();
        inner.shares.retain(|s| live.contains(&s.identity_id));
        let removed = (before - inner.shares.len()) as u64;
        if removed > 0 {
            tracing::info!(removed, "purged orphaned identity shares");
        }
        Ok(removed)
    }
}
