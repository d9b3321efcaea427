//! Readiness probes and their aggregation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hg_cache::CacheClient;
use hg_domain::health::{aggregate, HealthStatus, ProbeReport};
use hg_drivers::DriverRegistry;

use crate::maintenance::MaintenanceMetrics;
use crate::realtime::Hub;

/// Ping port for whatever persistence backs the stores.
#[async_trait::async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> hg_domain::Result<()>;
}

/// Probe for deployments running entirely on in-process stores.
pub struct InProcessStores;

#[async_trait::async_trait]
impl DatabaseProbe for InProcessStores {
    async fn ping(&self) -> hg_domain::Result<()> {
        Ok(())
    }
}

/// Runs the probe set for the readiness endpoint.
pub struct Monitor {
    db: Arc<dyn DatabaseProbe>,
    cache: Arc<CacheClient>,
    drivers: Arc<DriverRegistry>,
    hub: Arc<Hub>,
    maintenance: Arc<MaintenanceMetrics>,
    /// A job whose last run is older than this reports degraded.
    max_job_age: Duration,
}

impl Monitor {
    pub fn new(
        db: Arc<dyn DatabaseProbe>,
        cache: Arc<CacheClient>,
        drivers: Arc<DriverRegistry>,
        hub: Arc<Hub>,
        maintenance: Arc<MaintenanceMetrics>,
        max_job_age: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            drivers,
            hub,
            maintenance,
            max_job_age,
        }
    }

    /// Run every probe and fold the statuses.
    pub async fn readiness(&self) -> (HealthStatus, Vec<(&'static str, ProbeReport)>) {
        let reports = vec![
            ("database", self.probe_database().await),
            ("cache", self.probe_cache().await),
            ("drivers", self.probe_drivers()),
            ("realtime", self.probe_realtime()),
            ("maintenance", self.probe_maintenance()),
        ];
        let status = aggregate(reports.iter().map(|(_, report)| report));
        (status, reports)
    }

    async fn probe_database(&self) -> ProbeReport {
        let started = Instant::now();
        match self.db.ping().await {
            Ok(()) => ProbeReport::up(started.elapsed()),
            Err(err) => ProbeReport::down(err.to_string(), started.elapsed()),
        }
    }

    async fn probe_cache(&self) -> ProbeReport {
        let started = Instant::now();
        match self.cache.ping().await {
            Ok(()) => ProbeReport::up(started.elapsed()),
            Err(err) => ProbeReport::down(err.to_string(), started.elapsed()),
        }
    }

    fn probe_drivers(&self) -> ProbeReport {
        let started = Instant::now();
        let count = self.drivers.len();
        if count == 0 {
            ProbeReport::degraded("no drivers registered", started.elapsed())
        } else {
            ProbeReport {
                status: HealthStatus::Up,
                detail: Some(format!("{count} drivers")),
                duration: started.elapsed(),
            }
        }
    }

    fn probe_realtime(&self) -> ProbeReport {
        let started = Instant::now();
        let failures = self.hub.failure_count();
        let connections = self.hub.connection_count();
        if failures > 0 {
            ProbeReport::down(
                format!("{failures} write failures, {connections} connections"),
                started.elapsed(),
            )
        } else {
            ProbeReport {
                status: HealthStatus::Up,
                detail: Some(format!("{connections} connections")),
                duration: started.elapsed(),
            }
        }
    }

    fn probe_maintenance(&self) -> ProbeReport {
        let started = Instant::now();
        let stats = self.maintenance.stats();
        if stats.is_empty() {
            return ProbeReport {
                status: HealthStatus::Up,
                detail: Some("no jobs registered".into()),
                duration: started.elapsed(),
            };
        }

        let failing: Vec<&str> = stats
            .iter()
            .filter(|(_, s)| s.consecutive_failures > 0)
            .map(|(job, _)| job.as_str())
            .collect();
        if !failing.is_empty() {
            return ProbeReport::down(
                format!("failing jobs: {}", failing.join(", ")),
                started.elapsed(),
            );
        }

        let max_age = chrono::Duration::from_std(self.max_job_age)
            .unwrap_or_else(|_| chrono::Duration::days(2));
        let now = chrono::Utc::now();
        let overdue: Vec<&str> = stats
            .iter()
            .filter(|(_, s)| s.last_run_at.is_some_and(|at| now - at > max_age))
            .map(|(job, _)| job.as_str())
            .collect();
        if !overdue.is_empty() {
            return ProbeReport::degraded(
                format!("overdue jobs: {}", overdue.join(", ")),
                started.elapsed(),
            );
        }

        ProbeReport::up(started.elapsed())
    }
}
