//! Password hashing for local accounts.

use hg_domain::{Error, Result};

/// Hash a password with bcrypt at the library default cost.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::internal("hashing password").with_source(e))
}

/// Verify a password against a stored bcrypt hash.
///
/// The comparison inside bcrypt is constant-time; a malformed stored hash is
/// reported as an internal error, never as a failed login.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    bcrypt::verify(password, stored_hash)
        .map_err(|e| Error::internal("verifying password").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("incorrect horse", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b, "two hashes of the same password must differ");
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-bcrypt-hash").is_err());
    }
}
