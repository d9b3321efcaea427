//! Credential vault: derives a working key from the configured master key
//! and seals/opens identity payloads with it.

pub mod identity;
pub mod keys;

pub use identity::{IdentityRecord, IdentityShare, IdentityStore, MemoryIdentityStore, VaultStore};
pub use keys::{KeyMetadata, KeyMetadataStore, MemoryKeyMetadataStore, VaultCipher};
