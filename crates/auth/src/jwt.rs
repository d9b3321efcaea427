//! Access-token issuance and validation.
//!
//! Tokens are HS256 only; the validator pins the algorithm so a client
//! cannot downgrade it through the header. Expiry and not-before are checked
//! against the service's own clock rather than the library's system time, so
//! tests (and replayed audit investigations) can pin the instant.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use hg_domain::{Error, Result};

/// Minimum HS256 secret length in bytes.
const MIN_SECRET_LEN: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Time source for issuance and validation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claims
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Refresh-session ID. Duplicated in `sid` for clients that only read
    /// custom claims.
    pub jti: String,
    pub sid: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JwtConfig {
    /// HS256 signing secret, >= 32 bytes.
    pub secret: Vec<u8>,
    /// Issuer claim; validation enforces a match when set.
    pub issuer: Option<String>,
    /// Token lifetime. Defaults to 15 minutes when zero.
    pub ttl: Duration,
}

pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: Option<String>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    pub fn new(config: JwtConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(Error::validation(format!(
                "jwt secret must carry at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let ttl = if config.ttl.is_zero() {
            Duration::from_secs(15 * 60)
        } else {
            config.ttl
        };
        Ok(Self {
            encoding: EncodingKey::from_secret(&config.secret),
            decoding: DecodingKey::from_secret(&config.secret),
            issuer: config.issuer,
            ttl: chrono::Duration::from_std(ttl)
                .map_err(|e| Error::validation("jwt ttl out of range").with_source(e))?,
            clock,
        })
    }

    /// Issue a token for `user_id` bound to `session_id`.
    pub fn issue(
        &self,
        user_id: &str,
        session_id: &str,
        audience: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: session_id.to_string(),
            sid: session_id.to_string(),
            iss: self.issuer.clone().unwrap_or_default(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            aud: audience.map(str::to_string),
            // The caller keeps its map; mutations after issue don't reach
            // the token.
            meta: metadata.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::internal("signing token").with_source(e))
    }

    /// Validate a token and return its claims.
    ///
    /// Every failure collapses to the same "invalid token" error; the cause
    /// stays on the source chain for logs.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let invalid = || Error::unauthorized("invalid token");

        let mut validation = Validation::new(Algorithm::HS256);
        // Time and issuer are checked below against our own clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| invalid().with_source(e))?;
        let claims = data.claims;

        let now = self.clock.now().timestamp();
        if now < claims.nbf || now >= claims.exp {
            return Err(invalid());
        }
        if claims.sub.trim().is_empty() {
            return Err(invalid());
        }
        if let Some(expected) = &self.issuer {
            if &claims.iss != expected {
                return Err(invalid());
            }
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.now.lock();
            *now += chrono::Duration::from_std(duration).unwrap();
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    fn secret() -> Vec<u8> {
        b"0123456789abcdef0123456789abcdef".to_vec()
    }

    fn service(clock: Arc<dyn Clock>) -> JwtService {
        JwtService::new(
            JwtConfig {
                secret: secret(),
                issuer: Some("hopgate".into()),
                ttl: Duration::from_secs(900),
            },
            clock,
        )
        .unwrap()
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let svc = service(TestClock::new());
        let mut meta = BTreeMap::new();
        meta.insert("device".to_string(), "laptop".to_string());

        let token = svc.issue("u1", "sess-1", Some("web"), &meta).unwrap();
        let claims = svc.validate(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.sid, "sess-1");
        assert_eq!(claims.jti, "sess-1");
        assert_eq!(claims.iss, "hopgate");
        assert_eq!(claims.aud.as_deref(), Some("web"));
        assert_eq!(claims.meta.get("device").map(String::as_str), Some("laptop"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let clock = TestClock::new();
        let svc = service(clock.clone());
        let token = svc.issue("u1", "s1", None, &BTreeMap::new()).unwrap();

        clock.advance(Duration::from_secs(901));
        assert!(svc.validate(&token).is_err());
    }

    #[test]
    fn token_is_valid_until_exactly_exp() {
        let clock = TestClock::new();
        let svc = service(clock.clone());
        let token = svc.issue("u1", "s1", None, &BTreeMap::new()).unwrap();

        clock.advance(Duration::from_secs(899));
        assert!(svc.validate(&token).is_ok());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let clock = TestClock::new();
        let issuer_a = service(clock.clone());
        let issuer_b = JwtService::new(
            JwtConfig {
                secret: secret(),
                issuer: Some("someone-else".into()),
                ttl: Duration::from_secs(900),
            },
            clock,
        )
        .unwrap();

        let token = issuer_b.issue("u1", "s1", None, &BTreeMap::new()).unwrap();
        assert!(issuer_a.validate(&token).is_err());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let svc = service(TestClock::new());
        let token = svc.issue("u1", "s1", None, &BTreeMap::new()).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert!(svc.validate(&tampered).is_err());
    }

    #[test]
    fn foreign_algorithm_is_rejected() {
        let clock = TestClock::new();
        let svc = service(clock.clone());

        // Same secret, but signed with HS384 — the validator pins HS256.
        let claims = Claims {
            sub: "u1".into(),
            jti: "s1".into(),
            sid: "s1".into(),
            iss: "hopgate".into(),
            iat: clock.now().timestamp(),
            nbf: clock.now().timestamp(),
            exp: clock.now().timestamp() + 900,
            aud: None,
            meta: BTreeMap::new(),
        };
        let foreign = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(&secret()),
        )
        .unwrap();
        assert!(svc.validate(&foreign).is_err());
    }

    #[test]
    fn empty_subject_is_rejected() {
        let clock = TestClock::new();
        let svc = service(clock.clone());
        let token = svc.issue("  ", "s1", None, &BTreeMap::new()).unwrap();
        assert!(svc.validate(&token).is_err());
    }

    #[test]
    fn short_secret_is_refused() {
        let result = JwtService::new(
            JwtConfig {
                secret: b"short".to_vec(),
                issuer: None,
                ttl: Duration::from_secs(900),
            },
            TestClock::new(),
        );
        assert!(result.is_err());
    }
}
