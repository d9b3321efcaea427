//! Crypto primitives shared by the vault and auth services: bcrypt password
//! hashing, AES-256-GCM sealing, the Argon2id KDF, and random token
//! generation.

pub mod aead;
pub mod kdf;
pub mod password;
pub mod token;

pub use aead::{decrypt, encrypt, NONCE_LEN};
pub use kdf::{derive_key, KdfParams};
pub use password::{hash_password, verify_password};
pub use token::{random_hex, random_token};
