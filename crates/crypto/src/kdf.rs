//! Argon2id key derivation for the vault working key.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

/// Minimum salt length in bytes.
pub const MIN_SALT_LEN: usize = 16;

/// Argon2id parameters. Defaults follow the OWASP baseline for server-side
/// key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Iterations.
    pub time_cost: u32,
    /// Memory in KiB.
    pub memory_kib: u32,
    /// Lanes / threads.
    pub parallelism: u32,
    /// Derived key length in bytes. Must be 16, 24, or 32.
    pub output_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_kib: 64 * 1024,
            parallelism: 4,
            output_len: 32,
        }
    }
}

impl KdfParams {
    /// Check the parameter envelope before handing it to Argon2.
    pub fn validate(&self) -> Result<()> {
        if self.time_cost == 0 {
            return Err(Error::validation("kdf time cost must be at least 1"));
        }
        if self.parallelism == 0 {
            return Err(Error::validation("kdf parallelism must be at least 1"));
        }
        if self.memory_kib < 8 * self.parallelism {
            return Err(Error::validation(
                "kdf memory must be at least 8 KiB per lane",
            ));
        }
        if ![16, 24, 32].contains(&self.output_len) {
            return Err(Error::validation("kdf output length must be 16, 24, or 32"));
        }
        Ok(())
    }
}

/// Derive `params.output_len` bytes from `secret` and `salt`.
///
/// Deterministic: the same (secret, salt, params) triple always produces the
/// same key.
pub fn derive_key(secret: &[u8], salt: &[u8], params: &KdfParams) -> Result<Vec<u8>> {
    params.validate()?;
    if salt.len() < MIN_SALT_LEN {
        return Err(Error::validation(format!(
            "kdf salt must be at least {MIN_SALT_LEN} bytes"
        )));
    }

    let inner = Params::new(
        params.memory_kib,
        params.time_cost,
        params.parallelism,
        Some(params.output_len),
    )
    .map_err(|e| Error::validation(format!("kdf parameters rejected: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, inner);

    let mut out = vec![0u8; params.output_len];
    argon
        .hash_password_into(secret, salt, &mut out)
        .map_err(|e| Error::internal("deriving key").with_source(e.to_string()))?;
    Ok(out)
}
