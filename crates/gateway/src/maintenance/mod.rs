//! Cron-driven maintenance: expired refresh sessions, audit retention,
//! one-time tokens, vault orphans, and recording retention.
//!
//! Jobs run sequentially inside the scheduler task, so stopping the
//! scheduler inherently waits for the in-flight job. Failures are recorded
//! (the consecutive-failure counter feeds the maintenance probe) and logged;
//! they never take the scheduler down.

pub mod cron;
pub mod tokens;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use hg_auth::SessionService;
use hg_domain::audit::AuditStore;
use hg_vault::VaultStore;

use crate::recordings::FilesystemRecordingStore;
pub use cron::{parse_tz, CronSpec};
pub use tokens::{cleanup_tokens, MemoryTokenStore, TokenCleanupCounts, TokenRow, TokenStore};

/// How often due jobs are evaluated.
const TICK_PERIOD: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes & metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one job run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: String,
    pub duration: Duration,
    pub success: bool,
    pub message: String,
    pub finished_at: DateTime<Utc>,
}

/// Per-job rollup read by the maintenance probe.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub consecutive_failures: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
}

/// Sink for job outcomes.
#[derive(Default)]
pub struct MaintenanceMetrics {
    jobs: RwLock<HashMap<String, JobStats>>,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: JobOutcome) {
        let mut jobs = self.jobs.write();
        let stats = jobs.entry(outcome.job.clone()).or_default();
        stats.consecutive_failures = if outcome.success {
            0
        } else {
            stats.consecutive_failures + 1
        };
        stats.last_run_at = Some(outcome.finished_at);
        stats.last_outcome = Some(outcome);
    }

    pub fn stats(&self) -> HashMap<String, JobStats> {
        self.jobs.read().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A maintenance job body.
#[async_trait::async_trait]
pub trait MaintenanceTask: Send + Sync {
    fn name(&self) -> &'static str;
    /// Runs one sweep and returns a human-readable summary.
    async fn run(&self) -> hg_domain::Result<String>;
}

/// Removes expired and long-revoked refresh sessions.
pub struct SessionCleanupTask {
    pub sessions: Arc<SessionService>,
}

#[async_trait::async_trait]
impl MaintenanceTask for SessionCleanupTask {
    fn name(&self) -> &'static str {
        "sessions"
    }

    async fn run(&self) -> hg_domain::Result<String> {
        let removed = self.sessions.cleanup_expired().await?;
        Ok(format!("removed {removed} refresh sessions"))
    }
}

/// Applies the audit retention window.
pub struct AuditCleanupTask {
    pub store: Arc<dyn AuditStore>,
    pub retention_days: u32,
}

#[async_trait::async_trait]
impl MaintenanceTask for AuditCleanupTask {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn run(&self) -> hg_domain::Result<String> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention_days));
        let removed = self.store.purge_older_than(cutoff).await?;
        Ok(format!(
            "removed {removed} audit records older than {} days",
            self.retention_days
        ))
    }
}

/// Sweeps consumed and expired one-time tokens.
pub struct TokenCleanupTask {
    pub store: Arc<dyn TokenStore>,
}

#[async_trait::async_trait]
impl MaintenanceTask for TokenCleanupTask {
    fn name(&self) -> &'static str {
        "tokens"
    }

    async fn run(&self) -> hg_domain::Result<String> {
        let counts = cleanup_tokens(self.store.as_ref(), Utc::now()).await?;
        Ok(format!(
            "removed {} password resets, {} invites, {} email verifications",
            counts.password_resets, counts.invites, counts.email_verifications
        ))
    }
}

/// Sweeps vault shares whose identity is gone.
pub struct VaultCleanupTask {
    pub store: Arc<dyn VaultStore>,
}

#[async_trait::async_trait]
impl MaintenanceTask for VaultCleanupTask {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn run(&self) -> hg_domain::Result<String> {
        let removed = self.store.purge_orphans().await?;
        Ok(format!("removed {removed} orphaned vault shares"))
    }
}

/// Deletes recordings past their retention date, blob first.
pub struct RecordingCleanupTask {
    pub store: Arc<FilesystemRecordingStore>,
}

#[async_trait::async_trait]
impl MaintenanceTask for RecordingCleanupTask {
    fn name(&self) -> &'static str {
        "recordings"
    }

    async fn run(&self) -> hg_domain::Result<String> {
        let swept = self.store.purge_expired(Utc::now()).await?;
        Ok(format!(
            "removed {} recordings ({} blob failures)",
            swept.removed, swept.failed
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScheduledJob {
    spec: CronSpec,
    task: Arc<dyn MaintenanceTask>,
    next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    metrics: Arc<MaintenanceMetrics>,
    tz: chrono_tz::Tz,
}

impl Scheduler {
    pub fn new(metrics: Arc<MaintenanceMetrics>, tz: chrono_tz::Tz) -> Self {
        Self {
            jobs: Vec::new(),
            metrics,
            tz,
        }
    }

    pub fn add_job(&mut self, spec: CronSpec, task: Arc<dyn MaintenanceTask>) {
        tracing::info!(job = task.name(), "maintenance job registered");
        self.jobs.push(ScheduledJob {
            spec,
            task,
            next_run: None,
        });
    }

    /// Spawn the scheduler loop.
    pub fn start(mut self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let now = Utc::now();
            for job in &mut self.jobs {
                job.next_run = job.spec.next_after(&now, self.tz);
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_due().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("maintenance scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run_due(&mut self) {
        let now = Utc::now();
        for job in &mut self.jobs {
            let due = job.next_run.is_some_and(|at| at <= now);
            if !due {
                continue;
            }
            job.next_run = job.spec.next_after(&now, self.tz);
            let outcome = run_task(job.task.as_ref()).await;
            self.metrics.record(outcome);
        }
    }
}

/// Run one task and shape the outcome. Failures are logged, never raised.
pub(crate) async fn run_task(task: &dyn MaintenanceTask) -> JobOutcome {
    let started = std::time::Instant::now();
    let result = task.run().await;
    let duration = started.elapsed();

    match result {
        Ok(message) => {
            tracing::info!(job = task.name(), elapsed_ms = duration.as_millis() as u64, %message, "maintenance job finished");
            JobOutcome {
                job: task.name().to_string(),
                duration,
                success: true,
                message,
                finished_at: Utc::now(),
            }
        }
        Err(err) => {
            tracing::warn!(job = task.name(), error = %err, "maintenance job failed");
            JobOutcome {
                job: task.name().to_string(),
                duration,
                success: false,
                message: err.to_string(),
                finished_at: Utc::now(),
            }
        }
    }
}

/// Running scheduler. [`stop`](Self::stop) halts the loop and waits for the
/// in-flight job to finish.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
