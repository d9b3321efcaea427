//! Liveness, readiness, and Prometheus metrics endpoints.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};

use hg_domain::health::HealthStatus;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /healthz — liveness (public)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /readyz — probe aggregation (public)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (status, reports) = state.monitor.readiness().await;

    let probes: BTreeMap<&str, serde_json::Value> = reports
        .into_iter()
        .map(|(name, report)| (name, serde_json::to_value(report).unwrap_or_default()))
        .collect();

    let code = match status {
        HealthStatus::Up | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(serde_json::json!({
            "success": code == StatusCode::OK,
            "data": { "status": status, "probes": probes },
        })),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /metrics — Prometheus text format (public)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

fn render_metrics(state: &AppState) -> String {
    let mut out = String::with_capacity(1024);

    let _ = writeln!(out, "# HELP hopgate_active_sessions Live sessions in the registry.");
    let _ = writeln!(out, "# TYPE hopgate_active_sessions gauge");
    let _ = writeln!(out, "hopgate_active_sessions {}", state.active_sessions.count());

    let _ = writeln!(out, "# HELP hopgate_realtime_connections Open realtime connections.");
    let _ = writeln!(out, "# TYPE hopgate_realtime_connections gauge");
    let _ = writeln!(out, "hopgate_realtime_connections {}", state.hub.connection_count());

    let _ = writeln!(out, "# HELP hopgate_realtime_failures_total Realtime write failures and evictions.");
    let _ = writeln!(out, "# TYPE hopgate_realtime_failures_total counter");
    let _ = writeln!(out, "hopgate_realtime_failures_total {}", state.hub.failure_count());

    let _ = writeln!(out, "# HELP hopgate_drivers_registered Registered protocol drivers.");
    let _ = writeln!(out, "# TYPE hopgate_drivers_registered gauge");
    let _ = writeln!(out, "hopgate_drivers_registered {}", state.drivers.len());

    let stats = state.maintenance.stats();
    let _ = writeln!(out, "# HELP hopgate_maintenance_consecutive_failures Consecutive failures per maintenance job.");
    let _ = writeln!(out, "# TYPE hopgate_maintenance_consecutive_failures gauge");
    let _ = writeln!(out, "# HELP hopgate_maintenance_last_run_age_seconds Seconds since each job last ran.");
    let _ = writeln!(out, "# TYPE hopgate_maintenance_last_run_age_seconds gauge");
    let now = chrono::Utc::now();
    let mut jobs: Vec<_> = stats.iter().collect();
    jobs.sort_by_key(|(name, _)| name.to_string());
    for (name, job) in jobs {
        let _ = writeln!(
            out,
            "hopgate_maintenance_consecutive_failures{{job=\"{name}\"}} {}",
            job.consecutive_failures
        );
        if let Some(at) = job.last_run_at {
            let _ = writeln!(
                out,
                "hopgate_maintenance_last_run_age_seconds{{job=\"{name}\"}} {}",
                (now - at).num_seconds().max(0)
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use crate::maintenance::JobOutcome;

    #[test]
    fn metrics_include_gauges_and_job_labels() {
        let state = test_state();
        state.maintenance.record(JobOutcome {
            job: "audit".into(),
            duration: std::time::Duration::from_millis(3),
            success: true,
            message: "ok".into(),
            finished_at: chrono::Utc::now(),
        });

        let body = render_metrics(&state);
        assert!(body.contains("hopgate_active_sessions 0"));
        assert!(body.contains("hopgate_realtime_connections 0"));
        assert!(body.contains("hopgate_maintenance_consecutive_failures{job=\"audit\"} 0"));
        assert!(body.contains("hopgate_maintenance_last_run_age_seconds{job=\"audit\"}"));
    }
}
