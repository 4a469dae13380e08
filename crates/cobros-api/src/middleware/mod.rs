//! Cross-cutting HTTP middleware
//!
//! Authentication and authorization gates live in [`crate::auth::middleware`].

pub mod metrics;
pub mod security_headers;

pub use metrics::{metrics_middleware, AuthMetrics, MetricsSnapshot};
pub use security_headers::security_headers_middleware;
