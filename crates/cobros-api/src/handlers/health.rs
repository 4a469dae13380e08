//! Health check and metrics handlers

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Liveness probe - basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_secs(),
    })
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// `None` when running without PostgreSQL
    pub database: Option<bool>,
}

/// Readiness probe - checks the database when one is configured
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Service not ready", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.postgres {
        Some(store) => Some(store.health_check().await),
        None => None,
    };
    let ready = state.is_ready() && database.unwrap_or(true);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready, database }))
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name} {value}\n");
}

/// Prometheus-compatible metrics endpoint
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let mut output = String::new();

    let _ = writeln!(output, "# HELP cobros_uptime_seconds Time since server start");
    let _ = writeln!(output, "# TYPE cobros_uptime_seconds gauge");
    let _ = writeln!(output, "cobros_uptime_seconds {}\n", state.uptime_secs());

    counter(
        &mut output,
        "cobros_requests_total",
        "Total number of HTTP requests",
        snapshot.requests_total,
    );
    counter(
        &mut output,
        "cobros_logins_succeeded_total",
        "Successful logins",
        snapshot.logins_succeeded,
    );
    counter(
        &mut output,
        "cobros_logins_failed_total",
        "Rejected logins (bad credentials or inactive account)",
        snapshot.logins_failed,
    );
    counter(
        &mut output,
        "cobros_logins_locked_out_total",
        "Logins refused because of the failed-attempt lockout",
        snapshot.logins_locked_out,
    );
    counter(
        &mut output,
        "cobros_tokens_rejected_total",
        "Requests rejected by token verification",
        snapshot.tokens_rejected,
    );
    counter(
        &mut output,
        "cobros_access_denied_total",
        "Requests rejected by role, permission or ownership gates",
        snapshot.access_denied,
    );

    if let Some(store) = &state.postgres {
        let pool = store.pool();
        let size = pool.size();
        let idle = pool.num_idle() as u32;
        let _ = writeln!(output, "# HELP cobros_db_pool_connections Database pool connections");
        let _ = writeln!(output, "# TYPE cobros_db_pool_connections gauge");
        let _ = writeln!(output, "cobros_db_pool_connections{{state=\"active\"}} {}", size.saturating_sub(idle));
        let _ = writeln!(output, "cobros_db_pool_connections{{state=\"idle\"}} {idle}\n");
    }

    let _ = writeln!(output, "# HELP cobros_http_requests_total HTTP requests by endpoint and status");
    let _ = writeln!(output, "# TYPE cobros_http_requests_total counter");
    for (endpoint, status, count) in &snapshot.by_endpoint {
        let _ = writeln!(
            output,
            "cobros_http_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}"
        );
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}
