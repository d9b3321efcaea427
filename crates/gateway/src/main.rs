use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use hg_auth::{
    JwtConfig, JwtService, MemorySessionStore, SessionService, SessionServiceConfig, SystemClock,
};
use hg_cache::CacheClient;
use hg_domain::config::{Config, ConfigSeverity};
use hg_domain::audit::MemoryAuditStore;
use hg_drivers::{DriverRegistry, ProtocolRegistry};
use hg_gateway::api;
use hg_gateway::audit::AuditService;
use hg_gateway::maintenance::{
    self, AuditCleanupTask, CronSpec, MaintenanceMetrics, MemoryTokenStore, RecordingCleanupTask,
    Scheduler, SessionCleanupTask, TokenCleanupTask, VaultCleanupTask,
};
use hg_gateway::monitoring::{InProcessStores, Monitor};
use hg_gateway::realtime::Hub;
use hg_gateway::recordings::FilesystemRecordingStore;
use hg_gateway::sessions::{
    ActiveSessionRegistry, MemoryConnectionSessionStore, SessionLauncher,
};
use hg_gateway::state::AppState;
use hg_vault::{MemoryIdentityStore, MemoryKeyMetadataStore, VaultCipher};

/// How long a session may miss heartbeats before the stale sweeper drops it.
const STALE_SESSION_GRACE: Duration = Duration::from_secs(5 * 60);
/// Stale-sweep cadence.
const STALE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "hopgate", about = "Multi-user remote-access control plane")]
struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(cli.config.as_deref())
                .map_err(|e| anyhow::anyhow!(e))
                .context("loading configuration")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("hopgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hg_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hopgate starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Auth ─────────────────────────────────────────────────────────
    let jwt = Arc::new(JwtService::new(
        JwtConfig {
            secret: config.auth.jwt_secret.clone(),
            issuer: Some(config.auth.issuer.clone()),
            ttl: Duration::from_secs(config.auth.access_ttl_secs),
        },
        Arc::new(SystemClock),
    )?);
    let sessions = Arc::new(SessionService::new(
        Arc::new(MemorySessionStore::new()),
        SessionServiceConfig {
            refresh_ttl: Duration::from_secs(config.auth.refresh_ttl_secs),
            token_bytes: config.auth.refresh_token_bytes,
            ..Default::default()
        },
    ));

    // ── Vault ────────────────────────────────────────────────────────
    let salt = match &config.vault.salt_b64 {
        Some(b64) => Some(BASE64.decode(b64).context("decoding vault salt")?),
        None => None,
    };
    let vault = Arc::new(VaultCipher::new(
        &config.vault.master_key,
        salt.as_deref(),
        None,
    )?);
    let key_metadata = MemoryKeyMetadataStore::new();
    vault.bootstrap(&key_metadata).await?;
    let identities = Arc::new(MemoryIdentityStore::new());

    // ── Cache ────────────────────────────────────────────────────────
    let cache = Arc::new(CacheClient::new(config.cache.clone()));

    // ── Catalog ──────────────────────────────────────────────────────
    // Driver crates register themselves here during deployment wiring.
    let drivers = Arc::new(DriverRegistry::new());
    let protocols = Arc::new(ProtocolRegistry::from_drivers(&drivers));
    tracing::info!(drivers = drivers.len(), "driver catalog ready");

    // ── Live state ───────────────────────────────────────────────────
    let hub = Arc::new(Hub::new());
    let active_sessions = Arc::new(ActiveSessionRegistry::new(hub.clone()));
    let connection_sessions = Arc::new(MemoryConnectionSessionStore::new());

    // ── Audit ────────────────────────────────────────────────────────
    let audit_store = Arc::new(MemoryAuditStore::new());
    let audit = Arc::new(AuditService::new(audit_store.clone()));

    let launcher = Arc::new(SessionLauncher::new(
        drivers.clone(),
        vault.clone(),
        identities.clone(),
        active_sessions.clone(),
        connection_sessions,
        audit.clone(),
    ));

    // ── Maintenance ──────────────────────────────────────────────────
    let metrics = Arc::new(MaintenanceMetrics::new());
    let tz = maintenance::parse_tz(&config.maintenance.timezone);
    let mut scheduler = Scheduler::new(metrics.clone(), tz);
    scheduler.add_job(
        CronSpec::parse(&config.maintenance.sessions_spec)?,
        Arc::new(SessionCleanupTask {
            sessions: sessions.clone(),
        }),
    );
    scheduler.add_job(
        CronSpec::parse(&config.maintenance.audit_spec)?,
        Arc::new(AuditCleanupTask {
            store: audit_store,
            retention_days: config.maintenance.audit_retention_days,
        }),
    );
    scheduler.add_job(
        CronSpec::parse(&config.maintenance.tokens_spec)?,
        Arc::new(TokenCleanupTask {
            store: Arc::new(MemoryTokenStore::new()),
        }),
    );
    scheduler.add_job(
        CronSpec::parse(&config.maintenance.vault_spec)?,
        Arc::new(VaultCleanupTask {
            store: identities.clone(),
        }),
    );
    if config.recording.enabled {
        let recordings = Arc::new(FilesystemRecordingStore::new(config.recording.root.clone())?);
        scheduler.add_job(
            CronSpec::parse(&config.maintenance.recordings_spec)?,
            Arc::new(RecordingCleanupTask { store: recordings }),
        );
    }
    let scheduler_handle = scheduler.start();

    // ── Monitoring ───────────────────────────────────────────────────
    let monitor = Arc::new(Monitor::new(
        Arc::new(InProcessStores),
        cache.clone(),
        drivers.clone(),
        hub.clone(),
        metrics.clone(),
        Duration::from_secs(48 * 3600),
    ));

    let state = AppState {
        config: config.clone(),
        jwt,
        sessions,
        vault,
        cache,
        drivers,
        protocols,
        hub,
        active_sessions: active_sessions.clone(),
        launcher,
        audit,
        maintenance: metrics,
        monitor,
    };

    // ── Stale-session sweeper ────────────────────────────────────────
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STALE_SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = active_sessions.cleanup_stale(STALE_SESSION_GRACE);
            if removed > 0 {
                tracing::info!(removed, "stale sessions swept");
            }
        }
    });

    // ── HTTP server ──────────────────────────────────────────────────
    let app = api::router(state).layer(cors_layer(&config));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    sweeper.abort();
    scheduler_handle.stop().await;
    tracing::info!("hopgate stopped");
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
