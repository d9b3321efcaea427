//! Live-session state: the in-memory authoritative registry plus the
//! durable `ConnectionSession` rows used for analytics and recording
//! linkage.

pub mod launch;
pub mod registry;
pub mod store;

pub use launch::{LaunchInput, SessionLauncher};
pub use registry::{
    ActiveSessionRecord, ActiveSessionRegistry, ListFilter, RegisterError,
};
pub use store::{
    ConnectionSession, ConnectionSessionStatus, ConnectionSessionStore,
    MemoryConnectionSessionStore,
};
