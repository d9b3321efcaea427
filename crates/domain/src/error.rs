//! Shared error type used across all hopgate crates.
//!
//! Every error carries a stable UPPER_SNAKE code and an HTTP status so the
//! API boundary can map it to a response without downcasting. Internal causes
//! are attached as a `source` chain for logging and are never serialised to
//! clients.

use std::fmt;

/// Boxed internal cause attached to an [`Error`] for logging.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ErrorKind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Category of a hopgate error. Determines the wire code and HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input failed validation before any side effect.
    Validation,
    /// Missing or invalid credentials / token.
    Unauthorized,
    /// Login failed. Never reveals whether the account exists.
    InvalidCredentials,
    /// Password was accepted but an MFA challenge is outstanding.
    MfaRequired,
    /// MFA code or backup code rejected.
    MfaInvalid,
    /// Authenticated but not permitted.
    Forbidden,
    NotFound,
    /// State conflict, e.g. an active session already occupies the slot.
    Conflict,
    RateLimited,
    CsrfTokenInvalid,
    /// A collaborator (database, cache, driver) is unavailable.
    Upstream,
    /// Data failed an integrity check, e.g. ciphertext would not open.
    Integrity,
    Internal,
}

impl ErrorKind {
    /// Stable wire code, upper-snake.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MfaRequired => "MFA_REQUIRED",
            Self::MfaInvalid => "MFA_INVALID",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            Self::Upstream => "UPSTREAM_UNAVAILABLE",
            // Integrity failures are reported as internal errors so nothing
            // about ciphertext or key material leaks to the client.
            Self::Integrity => "INTERNAL_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the API boundary maps this kind to.
    pub fn status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized
            | Self::InvalidCredentials
            | Self::MfaRequired
            | Self::MfaInvalid => 401,
            Self::Forbidden | Self::CsrfTokenInvalid => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimited => 429,
            Self::Upstream => 503,
            Self::Integrity | Self::Internal => 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A typed hopgate error: kind + human message + optional internal cause.
///
/// Messages are safe to show to users; they never contain secrets, tokens,
/// or ciphertext. The cause chain is for logs only.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Cause>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an internal cause for logging.
    pub fn with_source(mut self, source: impl Into<Cause>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // ── Convenience constructors ─────────────────────────────────────

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorKind::InvalidCredentials, "invalid credentials")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_upper_snake() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::Unauthorized,
            ErrorKind::InvalidCredentials,
            ErrorKind::MfaRequired,
            ErrorKind::MfaInvalid,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::RateLimited,
            ErrorKind::CsrfTokenInvalid,
            ErrorKind::Upstream,
            ErrorKind::Integrity,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            let code = kind.code();
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "{code} is not upper-snake"
            );
        }
    }

    #[test]
    fn integrity_maps_to_internal_code() {
        let err = Error::integrity("payload would not open");
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.status(), 500);
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn source_chain_is_inspectable() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::upstream("cache unreachable").with_source(io);
        let source = std::error::Error::source(&err).expect("source attached");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::validation("x").status(), 400);
        assert_eq!(Error::invalid_credentials().status(), 401);
        assert_eq!(Error::not_found("driver").status(), 404);
        assert_eq!(Error::conflict("busy").status(), 409);
        assert_eq!(Error::rate_limited("slow down").status(), 429);
        assert_eq!(Error::upstream("db down").status(), 503);
    }
}
