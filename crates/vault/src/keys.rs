//! Working-key derivation and key metadata.
//!
//! The working key is a 32-byte Argon2id derivation of the master key. When
//! no salt is configured one is derived from `SHA-256(master)[..16]`, so the
//! same configured master key always reproduces the same working key across
//! restarts. [`KeyMetadata`] records which salt and parameters sealed the
//! existing payloads; on mismatch the vault refuses to open anything rather
//! than returning garbage.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hg_crypto::{derive_key, KdfParams};
use hg_domain::{Error, Result};

/// Sentinel sealed into [`KeyMetadata`] so a later boot can prove the
/// configured master key still opens existing payloads.
const KEY_CHECK_SENTINEL: &[u8] = b"vault-key-check-v1";

const WORKING_KEY_LEN: usize = 32;
const DERIVED_SALT_LEN: usize = 16;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// VaultCipher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Seals and opens vault payloads with a key derived from the master key.
pub struct VaultCipher {
    working_key: Vec<u8>,
    salt: Vec<u8>,
    params: KdfParams,
}

impl VaultCipher {
    /// Derive the working key. `salt` and `params` fall back to the
    /// deterministic defaults when absent.
    pub fn new(
        master_key: &[u8],
        salt: Option<&[u8]>,
        params: Option<KdfParams>,
    ) -> Result<Self> {
        if master_key.is_empty() {
            return Err(Error::validation("vault master key must not be empty"));
        }

        let salt: Vec<u8> = match salt {
            Some(s) => s.to_vec(),
            None => derive_default_salt(master_key),
        };
        let params = params.unwrap_or_else(|| KdfParams {
            output_len: WORKING_KEY_LEN,
            ..KdfParams::default()
        });
        if params.output_len != WORKING_KEY_LEN {
            return Err(Error::validation("vault working key must be 32 bytes"));
        }

        let working_key = derive_key(master_key, &salt, &params)?;
        Ok(Self {
            working_key,
            salt,
            params,
        })
    }

    /// Seal a payload, producing `base64(nonce ‖ ciphertext)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        if self.working_key.is_empty() {
            return Err(Error::internal("vault working key is empty"));
        }
        hg_crypto::encrypt(&self.working_key, plaintext)
    }

    /// Open a payload produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        if self.working_key.is_empty() {
            return Err(Error::internal("vault working key is empty"));
        }
        hg_crypto::decrypt(&self.working_key, sealed)
    }

    /// Key metadata describing this cipher, for persistence at bootstrap.
    pub fn metadata(&self) -> Result<KeyMetadata> {
        Ok(KeyMetadata {
            version: 1,
            salt_b64: BASE64.encode(&self.salt),
            params: self.params,
            verifier: self.seal(KEY_CHECK_SENTINEL)?,
            created_at: Utc::now(),
        })
    }

    /// Check that this cipher can open payloads sealed under `metadata`.
    ///
    /// Fails closed: a verifier that will not open means the configured
    /// master key (or its salt/parameters) changed, and every stored payload
    /// would be unreadable.
    pub fn verify_active(&self, metadata: &KeyMetadata) -> Result<()> {
        let recorded_salt = BASE64
            .decode(&metadata.salt_b64)
            .map_err(|e| Error::integrity("vault key metadata is corrupt").with_source(e))?;
        if recorded_salt != self.salt || metadata.params != self.params {
            return Err(Error::integrity(
                "vault key parameters do not match recorded key metadata",
            ));
        }
        match self.open(&metadata.verifier) {
            Ok(sentinel) if sentinel == KEY_CHECK_SENTINEL => Ok(()),
            _ => Err(Error::integrity(
                "vault master key does not open existing payloads",
            )),
        }
    }

    /// Bootstrap against the metadata store: persist metadata on first run,
    /// verify on every later run.
    pub async fn bootstrap(&self, store: &dyn KeyMetadataStore) -> Result<()> {
        match store.load().await? {
            Some(existing) => self.verify_active(&existing),
            None => {
                let metadata = self.metadata()?;
                store.save(metadata).await?;
                tracing::info!("vault key metadata written");
                Ok(())
            }
        }
    }
}

fn derive_default_salt(master_key: &[u8]) -> Vec<u8> {
    Sha256::digest(master_key)[..DERIVED_SALT_LEN].to_vec()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted record of which key sealed the vault's payloads.
/// Written once at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub version: u32,
    pub salt_b64: String,
    pub params: KdfParams,
    /// Sealed sentinel used to prove the key still matches.
    pub verifier: String,
    pub created_at: DateTime<Utc>,
}

/// Storage port for [`KeyMetadata`].
#[async_trait::async_trait]
pub trait KeyMetadataStore: Send + Sync {
    async fn load(&self) -> Result<Option<KeyMetadata>>;
    async fn save(&self, metadata: KeyMetadata) -> Result<()>;
}

/// In-memory metadata store.
#[derive(Default)]
pub struct MemoryKeyMetadataStore {
    metadata: parking_lot::Mutex<Option<KeyMetadata>>,
}

impl MemoryKeyMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyMetadataStore for MemoryKeyMetadataStore {
    async fn load(&self) -> Result<Option<KeyMetadata>> {
        Ok(self.metadata.lock().clone())
    }

    async fn save(&self, metadata: KeyMetadata) -> Result<()> {
        *self.metadata.lock() = Some(metadata);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn fast_params() -> KdfParams {
        KdfParams {
            time_cost: 1,
            memory_kib: 64,
            parallelism: 1,
            output_len: 32,
        }
    }

    fn cipher(master: &[u8]) -> VaultCipher {
        VaultCipher::new(master, None, Some(fast_params())).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let master = [9u8; 32];
        let vault = cipher(&master);
        let sealed = vault.seal(b"{\"password\":\"hunter2\"}").unwrap();
        assert_eq!(vault.open(&sealed).unwrap(), b"{\"password\":\"hunter2\"}");
    }

    #[test]
    fn same_master_key_reproduces_working_key() {
        let master = [7u8; 32];
        let a = cipher(&master);
        let b = cipher(&master);
        // A payload sealed by one instance opens under the other.
        let sealed = a.seal(b"portable").unwrap();
        assert_eq!(b.open(&sealed).unwrap(), b"portable");
    }

    #[test]
    fn tampered_payload_is_refused() {
        let vault = cipher(&[1u8; 32]);
        let sealed = vault.seal(b"payload").unwrap();
        let mut blob = base64::engine::general_purpose::STANDARD
            .decode(&sealed)
            .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(blob);
        assert!(vault.open(&tampered).is_err());
    }

    #[test]
    fn empty_master_key_is_refused() {
        assert!(VaultCipher::new(&[], None, Some(fast_params())).is_err());
    }

    #[test]
    fn verify_active_accepts_matching_key() {
        let vault = cipher(&[3u8; 32]);
        let metadata = vault.metadata().unwrap();
        vault.verify_active(&metadata).unwrap();
    }

    #[test]
    fn verify_active_rejects_changed_master_key() {
        let old = cipher(&[3u8; 32]);
        let metadata = old.metadata().unwrap();
        let new = cipher(&[4u8; 32]);
        assert!(new.verify_active(&metadata).is_err());
    }

    #[tokio::test]
    async fn bootstrap_writes_then_verifies() {
        let store = MemoryKeyMetadataStore::new();
        let vault = cipher(&[5u8; 32]);
        vault.bootstrap(&store).await.unwrap();
        assert!(store.load().await.unwrap().is_some());

        // Second boot with the same key verifies.
        vault.bootstrap(&store).await.unwrap();

        // A different key is refused.
        let other = cipher(&[6u8; 32]);
        assert!(other.bootstrap(&store).await.is_err());
    }
}
