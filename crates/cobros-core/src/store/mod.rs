//! Persistence traits for the auth core
//!
//! Four collaborators, each with a PostgreSQL implementation ([`postgres`])
//! and an in-process one ([`memory`]) used by tests and local tooling:
//! - [`CredentialStore`]: accounts and the last-administrator guard
//! - [`RevocationStore`]: per-account token denylists and revoke-all cutoffs
//! - [`LoginAttemptStore`]: failed-login counters with window decay
//! - [`AuditStore`]: persisted security events

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Account, AccountChanges, AuditRecord, FailedLogins, NewAccount, RevocationRecord,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation would leave no active administrator")]
    LastAdminProtected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Account persistence
///
/// `update_account` and `delete_account` enforce the last-administrator
/// invariant atomically with the mutation: if the change would leave zero
/// active administrators they fail with [`StoreError::LastAdminProtected`]
/// and nothing is written.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Exact (case-sensitive) match against handle or email
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// All accounts ordered by creation time
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    /// Fails with `Conflict` on a duplicate handle or email
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account>;

    /// Active administrators, optionally not counting `excluding`
    async fn count_active_admins(&self, excluding: Option<Uuid>) -> StoreResult<i64>;

    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> StoreResult<Account>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;

    async fn touch_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn delete_account(&self, id: Uuid) -> StoreResult<()>;
}

/// Token denylist persistence
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Append `token_id` to the account's list, keeping only the newest
    /// `cap` entries (FIFO by insertion).
    async fn revoke_token(
        &self,
        account_id: Uuid,
        token_id: &str,
        at: DateTime<Utc>,
        cap: usize,
    ) -> StoreResult<()>;

    /// Replace the account's list with a single cutoff at `at`.
    async fn revoke_all(&self, account_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn load(&self, account_id: Uuid) -> StoreResult<RevocationRecord>;
}

/// Failed-login counter persistence
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn get(&self, account_id: Uuid) -> StoreResult<Option<FailedLogins>>;

    /// Record one failure at `at`, resetting the count first if the previous
    /// failure is older than `window`. Returns the new state.
    async fn record_failure(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<FailedLogins>;

    async fn clear(&self, account_id: Uuid) -> StoreResult<()>;
}

/// Audit trail persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()>;
}
