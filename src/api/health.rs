use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    checks: HealthChecks,
}

/// Individual health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    telemetry: ComponentHealth,
    broadcaster: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ComponentHealth {
    fn healthy(detail: Option<String>) -> Self {
        Self { status: "healthy", detail }
    }

    fn degraded(detail: String) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail),
        }
    }
}

/// GET /api/v1/health
///
/// Reports from published state only; never triggers an upstream fetch.
/// Degraded telemetry still answers 200 since the service keeps serving the
/// last good snapshot; only shutdown answers 503.
pub async fn health_check(State(st): State<AppState>) -> impl IntoResponse {
    let snapshot = st.cache.current();
    let online = st.cache.device_online();

    let telemetry = match (online, snapshot.last_success) {
        (true, _) if snapshot.stale => ComponentHealth::degraded("last refresh failed".into()),
        (true, Some(at)) => ComponentHealth::healthy(Some(format!("last success {at}"))),
        (true, None) => ComponentHealth::healthy(None),
        (false, Some(at)) => ComponentHealth::degraded(format!("device offline since {at}")),
        (false, None) => ComponentHealth::degraded("no successful fetch yet".into()),
    };
    let broadcaster = ComponentHealth::healthy(Some(format!("{} live sessions", st.broadcaster.session_count())));

    let shutting_down = st.is_shutting_down();
    let all_healthy = telemetry.status == "healthy" && !shutting_down;
    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        checks: HealthChecks { telemetry, broadcaster },
    };
    let code = if shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}
