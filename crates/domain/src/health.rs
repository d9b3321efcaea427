//! Health taxonomy shared by the monitoring probes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Status of a single probe or of the aggregated system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
}

/// Result of one probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Probe wall time in milliseconds.
    #[serde(serialize_with = "ser_millis")]
    pub duration: Duration,
}

fn ser_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

impl ProbeReport {
    pub fn up(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Up,
            detail: None,
            duration,
        }
    }

    pub fn degraded(detail: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Degraded,
            detail: Some(detail.into()),
            duration,
        }
    }

    pub fn down(detail: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Down,
            detail: Some(detail.into()),
            duration,
        }
    }
}

/// Fold probe statuses: any Down wins, else any Degraded, else Up.
pub fn aggregate<'a, I>(reports: I) -> HealthStatus
where
    I: IntoIterator<Item = &'a ProbeReport>,
{
    let mut status = HealthStatus::Up;
    for report in reports {
        match report.status {
            HealthStatus::Down => return HealthStatus::Down,
            HealthStatus::Degraded => status = HealthStatus::Degraded,
            HealthStatus::Up => {}
        }
    }
    status
}
