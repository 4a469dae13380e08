//! Security audit logging for authentication events
//!
//! Every event is emitted on the "audit" tracing target and, when a store
//! is configured, persisted to the audit trail.
//!
//! # Architecture
//!
//! Callers never wait on audit I/O. [`AuditDispatcher::record`] pushes the
//! event onto an unbounded channel; a background worker hands it to each
//! configured [`AuditSink`]. Sink failures are logged at WARN on the
//! application target and never reach the caller.
//!
//! ```ignore
//! use cobros_api::audit::{AuditDispatcher, AuditEvent, TracingSink};
//!
//! let audit = AuditDispatcher::spawn(vec![Arc::new(TracingSink)], clock);
//! audit.record(AuditEvent::LoginSuccess {
//!     account_id,
//!     handle: "admin".to_string(),
//! });
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cobros_core::{AuditRecord, AuditStore, Clock, Role, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful login
    LoginSuccess { account_id: Uuid, handle: String },

    /// Failed login attempt
    LoginFailure {
        identifier: String,
        account_id: Option<Uuid>,
        reason: String,
        failed_attempts: Option<u32>,
        account_locked: bool,
    },

    /// Failure threshold reached
    AccountLocked {
        account_id: Uuid,
        handle: String,
        failed_attempts: u32,
    },

    /// Failed-login counter cleared by an administrator
    AccountUnlocked {
        account_id: Uuid,
        unlocked_by: Option<Uuid>,
    },

    PasswordChanged { account_id: Uuid, via_reset: bool },

    PasswordResetRequested { account_id: Uuid },

    /// Every outstanding token of the account was revoked
    SessionsRevoked {
        account_id: Uuid,
        revoked_by: Option<Uuid>,
    },

    Logout { account_id: Uuid, all_sessions: bool },

    AccessGranted {
        account_id: Uuid,
        method: String,
        path: String,
    },

    /// Access denied due to insufficient role, permission or ownership
    AccessDenied {
        account_id: Option<Uuid>,
        resource: String,
        required: String,
        ip_address: Option<String>,
    },

    /// Missing, invalid, expired or revoked token, or stale subject
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    AccountCreated {
        account_id: Uuid,
        handle: String,
        role: Role,
        created_by: Option<Uuid>,
    },

    AccountUpdated {
        account_id: Uuid,
        fields: Vec<String>,
        updated_by: Option<Uuid>,
    },

    AccountDeleted {
        account_id: Uuid,
        deleted_by: Option<Uuid>,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "login_success",
            AuditEvent::LoginFailure { .. } => "login_failure",
            AuditEvent::AccountLocked { .. } => "account_locked",
            AuditEvent::AccountUnlocked { .. } => "account_unlocked",
            AuditEvent::PasswordChanged { .. } => "password_changed",
            AuditEvent::PasswordResetRequested { .. } => "password_reset_requested",
            AuditEvent::SessionsRevoked { .. } => "sessions_revoked",
            AuditEvent::Logout { .. } => "logout",
            AuditEvent::AccessGranted { .. } => "access_granted",
            AuditEvent::AccessDenied { .. } => "access_denied",
            AuditEvent::InvalidToken { .. } => "invalid_token",
            AuditEvent::AccountCreated { .. } => "account_created",
            AuditEvent::AccountUpdated { .. } => "account_updated",
            AuditEvent::AccountDeleted { .. } => "account_deleted",
        }
    }

    /// Account the event is about, if known
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::LoginFailure { account_id, .. }
            | AuditEvent::AccessDenied { account_id, .. } => *account_id,
            AuditEvent::InvalidToken { .. } => None,
            AuditEvent::LoginSuccess { account_id, .. }
            | AuditEvent::AccountLocked { account_id, .. }
            | AuditEvent::AccountUnlocked { account_id, .. }
            | AuditEvent::PasswordChanged { account_id, .. }
            | AuditEvent::PasswordResetRequested { account_id }
            | AuditEvent::SessionsRevoked { account_id, .. }
            | AuditEvent::Logout { account_id, .. }
            | AuditEvent::AccessGranted { account_id, .. }
            | AuditEvent::AccountCreated { account_id, .. }
            | AuditEvent::AccountUpdated { account_id, .. }
            | AuditEvent::AccountDeleted { account_id, .. } => Some(*account_id),
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::AccountLocked { .. } => "Account locked",
            AuditEvent::AccountUnlocked { .. } => "Account unlocked",
            AuditEvent::PasswordChanged { .. } => "Password changed",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::SessionsRevoked { .. } => "Sessions revoked",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::AccessGranted { .. } => "Access granted",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::AccountCreated { .. } => "Account created",
            AuditEvent::AccountUpdated { .. } => "Account updated",
            AuditEvent::AccountDeleted { .. } => "Account deleted",
        }
    }
}

/// Log a security audit event with structured fields
///
/// Events are logged at INFO level with the "audit" target so they can be
/// routed separately from application logs. The full event is attached as
/// JSON:
///
/// ```json
/// {
///   "event_type": "login_failure",
///   "identifier": "admin",
///   "account_id": "550e8400-e29b-41d4-a716-446655440000",
///   "reason": "invalid_password",
///   "failed_attempts": 3,
///   "account_locked": false
/// }
/// ```
pub fn audit_log(event: &AuditEvent, at: DateTime<Utc>) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %at,
        event_type = event.event_type(),
        account_id = ?event.account_id(),
        event = %event_json,
        "{}",
        event.message()
    );
}

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, event: &AuditEvent, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Writes events to the "audit" tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, event: &AuditEvent, at: DateTime<Utc>) -> Result<(), StoreError> {
        audit_log(event, at);
        Ok(())
    }
}

/// Persists events through an [`AuditStore`]
pub struct StoreSink {
    store: Arc<dyn AuditStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreSink {
    async fn write(&self, event: &AuditEvent, at: DateTime<Utc>) -> Result<(), StoreError> {
        let record = AuditRecord {
            event_type: event.event_type().to_string(),
            account_id: event.account_id(),
            payload: serde_json::to_value(event)?,
            created_at: at,
        };
        self.store.append(&record).await
    }
}

enum Message {
    Event(AuditEvent, DateTime<Utc>),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking handle for recording audit events
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::UnboundedSender<Message>,
    clock: Arc<dyn Clock>,
}

impl AuditDispatcher {
    /// Start the worker task. Must be called inside a Tokio runtime.
    ///
    /// The worker exits once every dispatcher clone has been dropped.
    pub fn spawn(sinks: Vec<Arc<dyn AuditSink>>, clock: Arc<dyn Clock>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Event(event, at) => {
                        for sink in &sinks {
                            if let Err(e) = sink.write(&event, at).await {
                                warn!(
                                    event_type = event.event_type(),
                                    error = %e,
                                    "Failed to write audit event"
                                );
                            }
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        (Self { tx, clock }, worker)
    }

    /// Queue an event; never blocks and never fails the caller
    pub fn record(&self, event: AuditEvent) {
        let at = self.clock.now();
        if let Err(mpsc::error::SendError(Message::Event(event, _))) =
            self.tx.send(Message::Event(event, at))
        {
            warn!(
                event_type = event.event_type(),
                "Audit worker stopped, event dropped"
            );
        }
    }

    /// Wait until every event queued before this call has been written
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For (first hop) then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
