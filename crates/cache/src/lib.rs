//! Minimal cache client speaking a RESP2 subset over a single TCP or TLS
//! connection: AUTH, SELECT, INCR, PEXPIRE, PTTL, GET, SET PX, DEL.
//!
//! The one primitive rate limiters rely on is
//! [`CacheClient::increment_with_ttl`].

pub mod client;
pub mod resp;

pub use client::CacheClient;
pub use resp::Value;
