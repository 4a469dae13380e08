//! Cobros Core - Domain models, configuration and credential stores
//!
//! This crate defines the abstractions the auth core is built on:
//! - Accounts, roles and the static permission table
//! - Failed-login counters and token revocation records
//! - Store traits with PostgreSQL and in-memory implementations
//! - Configuration management
//! - An injectable clock

pub mod clock;
pub mod config;
pub mod models;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, ServerConfig};
pub use models::{
    Account, AccountChanges, AccountSummary, AuditRecord, FailedLogins, NewAccount, Permission,
    RevocationRecord, Role,
};
pub use store::{
    AuditStore, CredentialStore, LoginAttemptStore, MemoryStore, PgStore, RevocationStore,
    StoreError, StoreResult,
};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
