//! One-time-token sweep: password resets, invites, email verifications.

use chrono::{DateTime, Utc};

use hg_domain::Result;

/// Rows removed per table by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCleanupCounts {
    pub password_resets: u64,
    pub invites: u64,
    pub email_verifications: u64,
}

impl TokenCleanupCounts {
    pub fn total(&self) -> u64 {
        self.password_resets + self.invites + self.email_verifications
    }
}

/// Storage port. Each method deletes rows that expired before `now` or whose
/// consumption timestamp (`consumed_at` / `accepted_at` / `verified_at`) is
/// set, returning the number removed.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn purge_password_resets(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn purge_invites(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn purge_email_verifications(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Sweep all three tables.
pub async fn cleanup_tokens(
    store: &dyn TokenStore,
    now: DateTime<Utc>,
) -> Result<TokenCleanupCounts> {
    Ok(TokenCleanupCounts {
        password_resets: store.purge_password_resets(now).await?,
        invites: store.purge_invites(now).await?,
        email_verifications: store.purge_email_verifications(now).await?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A one-time token row. `consumed_at` stands in for `accepted_at` /
/// `verified_at` on the invite and verification tables.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    password_resets: Vec<TokenRow>,
    invites: Vec<TokenRow>,
    email_verifications: Vec<TokenRow>,
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tables: parking_lot::Mutex<Tables>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_password_reset(&self, row: TokenRow) {
        self.tables.lock().password_resets.push(row);
    }

    pub fn seed_invite(&self, row: TokenRow) {
        self.tables.lock().invites.push(row);
    }

    pub fn seed_email_verification(&self, row: TokenRow) {
        self.tables.lock().email_verifications.push(row);
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let tables = self.tables.lock();
        (
            tables.password_resets.len(),
            tables.invites.len(),
            tables.email_verifications.len(),
        )
    }
}

fn purge(rows: &mut Vec<TokenRow>, now: DateTime<Utc>) -> u64 {
    let before = rows.len();
    rows.retain(|row| row.expires_at >= now && row.consumed_at.is_none());
    (before - rows.len()) as u64
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn purge_password_resets(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(purge(&mut self.tables.lock().password_resets, now))
    }

    async fn purge_invites(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(purge(&mut self.tables.lock().invites, now))
    }

    async fn purge_email_verifications(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(purge(&mut self.tables.lock().email_verifications, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(expires_in: Duration, consumed: bool) -> TokenRow {
        TokenRow {
            expires_at: Utc::now() + expires_in,
            consumed_at: consumed.then(Utc::now),
        }
    }

    #[tokio::test]
    async fn expired_password_resets_are_swept() {
        let store = MemoryTokenStore::new();
        store.seed_password_reset(row(Duration::hours(-1), false));
        store.seed_password_reset(row(Duration::hours(-1), false));
        store.seed_password_reset(row(Duration::hours(1), false));

        let counts = cleanup_tokens(&store, Utc::now()).await.unwrap();
        assert_eq!(counts.password_resets, 2);
        assert_eq!(store.counts().0, 1);
    }

    #[tokio::test]
    async fn consumed_rows_are_swept_even_if_unexpired() {
        let store = MemoryTokenStore::new();
        store.seed_invite(row(Duration::hours(1), true)); // accepted
        store.seed_invite(row(Duration::hours(1), false));
        store.seed_email_verification(row(Duration::hours(1), true)); // verified
        store.seed_email_verification(row(Duration::hours(-1), false));

        let counts = cleanup_tokens(&store, Utc::now()).await.unwrap();
        assert_eq!(counts.invites, 1);
        assert_eq!(counts.email_verifications, 2);
        assert_eq!(counts.total(), 3);
        let (_, invites, verifications) = store.counts();
        assert_eq!(invites, 1);
        assert_eq!(verifications, 0);
    }

    #[tokio::test]
    async fn sweep_on_empty_tables_is_zero() {
        let store = MemoryTokenStore::new();
        let counts = cleanup_tokens(&store, Utc::now()).await.unwrap();
        assert_eq!(counts, TokenCleanupCounts::default());
    }
}
