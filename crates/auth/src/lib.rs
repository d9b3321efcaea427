//! Authentication: short-lived JWT access tokens bound to server-side
//! refresh sessions.

pub mod jwt;
pub mod session;

pub use jwt::{Claims, Clock, JwtConfig, JwtService, SystemClock};
pub use session::{
    DeviceInfo, MemorySessionStore, RefreshSession, SessionService, SessionServiceConfig,
    SessionStore, ValidateError,
};
