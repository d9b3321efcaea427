//! Random token generation from the OS RNG.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// URL-safe token over `n` random bytes (base64url, no padding).
/// Used for refresh tokens and invite links.
pub fn random_token(n: usize) -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(n))
}

/// Hex token over `n` random bytes. Used for human-readable secrets such as
/// backup codes.
pub fn random_hex(n: usize) -> String {
    hex::encode(random_bytes(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let token = random_token(32);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!token.contains('='), "no padding expected");
    }

    #[test]
    fn tokens_are_unique() {
        let a = random_token(32);
        let b = random_token(32);
        assert_ne!(a, b);
    }

    #[test]
    fn hex_token_length() {
        assert_eq!(random_hex(16).len(), 32);
        assert!(random_hex(16).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
