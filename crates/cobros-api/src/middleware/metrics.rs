//! Request and authentication counters
//!
//! Counts requests per endpoint and status, plus the auth outcomes the
//! `/metrics` endpoint exposes in Prometheus text format.

use crate::state::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide counters
#[derive(Debug, Default)]
pub struct AuthMetrics {
    requests_total: AtomicU64,
    logins_succeeded: AtomicU64,
    logins_failed: AtomicU64,
    logins_locked_out: AtomicU64,
    tokens_rejected: AtomicU64,
    access_denied: AtomicU64,
    by_endpoint: Mutex<BTreeMap<(String, u16), u64>>,
}

/// Point-in-time copy of [`AuthMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub logins_succeeded: u64,
    pub logins_failed: u64,
    pub logins_locked_out: u64,
    pub tokens_rejected: u64,
    pub access_denied: u64,
    pub by_endpoint: Vec<(String, u16, u64)>,
}

impl AuthMetrics {
    pub fn record_request(&self, endpoint: String, status: u16) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut by_endpoint = self.by_endpoint.lock().unwrap_or_else(|e| e.into_inner());
        *by_endpoint.entry((endpoint, status)).or_insert(0) += 1;
    }

    pub fn record_login_success(&self) {
        self.logins_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login_failure(&self) {
        self.logins_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lockout(&self) {
        self.logins_locked_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_token(&self) {
        self.tokens_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_access_denied(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_endpoint = self
            .by_endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|((endpoint, status), count)| (endpoint.clone(), *status, *count))
            .collect();

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            logins_succeeded: self.logins_succeeded.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),
            logins_locked_out: self.logins_locked_out.load(Ordering::Relaxed),
            tokens_rejected: self.tokens_rejected.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            by_endpoint,
        }
    }
}

/// Label for requests that matched no route
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Metrics tracking middleware
///
/// Requests are grouped by route template (`/api/v1/users/:id`), so the
/// label set is bounded by the router, not by what clients send.
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ENDPOINT, MatchedPath::as_str)
        .to_string();
    let response = next.run(request).await;
    state
        .metrics
        .record_request(endpoint, response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = AuthMetrics::default();
        metrics.record_request("/health".to_string(), 200);
        metrics.record_request("/health".to_string(), 200);
        metrics.record_request("/api/v1/auth/login".to_string(), 401);
        metrics.record_login_failure();
        metrics.record_lockout();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.logins_failed, 1);
        assert_eq!(snapshot.logins_locked_out, 1);
        assert_eq!(
            snapshot.by_endpoint,
            vec![
                ("/api/v1/auth/login".to_string(), 401, 1),
                ("/health".to_string(), 200, 2),
            ]
        );
    }
}
