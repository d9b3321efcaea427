use std::sync::Arc;

use hg_auth::{JwtService, SessionService};
use hg_cache::CacheClient;
use hg_domain::config::Config;
use hg_drivers::{DriverRegistry, ProtocolRegistry};
use hg_vault::VaultCipher;

use crate::audit::AuditService;
use crate::maintenance::MaintenanceMetrics;
use crate::monitoring::Monitor;
use crate::realtime::Hub;
use crate::sessions::{ActiveSessionRegistry, SessionLauncher};

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, auth, vault, cache
/// - **Catalog** — drivers and their protocol projection
/// - **Live state** — realtime hub, active-session registry
/// - **Operations** — audit, maintenance metrics, monitoring
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub jwt: Arc<JwtService>,
    pub sessions: Arc<SessionService>,
    pub vault: Arc<VaultCipher>,
    pub cache: Arc<CacheClient>,

    // ── Catalog ───────────────────────────────────────────────────────
    pub drivers: Arc<DriverRegistry>,
    pub protocols: Arc<ProtocolRegistry>,

    // ── Live state ────────────────────────────────────────────────────
    pub hub: Arc<Hub>,
    pub active_sessions: Arc<ActiveSessionRegistry>,
    pub launcher: Arc<SessionLauncher>,

    // ── Operations ────────────────────────────────────────────────────
    pub audit: Arc<AuditService>,
    pub maintenance: Arc<MaintenanceMetrics>,
    pub monitor: Arc<Monitor>,
}
