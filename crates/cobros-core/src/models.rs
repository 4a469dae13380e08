//! Domain models for accounts, roles and the auth bookkeeping records
//!
//! This module defines the data shared by every store implementation:
//! - Account: credential-bearing identity record
//! - Role / Permission: the static capability table
//! - FailedLogins: per-account failed-login counter with window decay
//! - RevocationRecord: per-account token denylist plus revoke-all cutoff
//! - AuditRecord: persisted security event

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use utoipa::ToSchema;
use uuid::Uuid;

/// Account role
///
/// `Administrator` carries every capability of `User` plus account and
/// system management.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum Role {
    Administrator,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::User => "User",
        }
    }

    /// Parse role from its stored name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "administrator" | "administrador" | "admin" => Some(Role::Administrator),
            "user" | "usuario" => Some(Role::User),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Administrator)
    }

    /// Whether this role satisfies a check that requires `required`.
    ///
    /// This and [`Role::grants`] are the only places the administrator
    /// bypass is decided.
    pub fn satisfies(&self, required: Role) -> bool {
        self.is_admin() || *self == required
    }

    /// Whether this role carries `permission`.
    pub fn grants(&self, permission: Permission) -> bool {
        self.is_admin() || self.permissions().contains(&permission)
    }

    /// Static permission set of the role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Administrator => Permission::ALL,
            Role::User => USER_PERMISSIONS,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Fine-grained capability, statically mapped from [`Role`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ClientesVer,
    ClientesCrear,
    ClientesEditar,
    ClientesEliminar,
    ServiciosVer,
    ServiciosCrear,
    ServiciosEditar,
    ServiciosEliminar,
    CobrosVer,
    CobrosCrear,
    CobrosEditar,
    CobrosEliminar,
    ReportesVer,
    UsuariosGestionar,
    ConfiguracionGestionar,
    RespaldosGestionar,
}

const USER_PERMISSIONS: &[Permission] = &[
    Permission::ClientesVer,
    Permission::ClientesCrear,
    Permission::ClientesEditar,
    Permission::ServiciosVer,
    Permission::CobrosVer,
    Permission::CobrosCrear,
    Permission::CobrosEditar,
    Permission::ReportesVer,
];

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::ClientesVer,
        Permission::ClientesCrear,
        Permission::ClientesEditar,
        Permission::ClientesEliminar,
        Permission::ServiciosVer,
        Permission::ServiciosCrear,
        Permission::ServiciosEditar,
        Permission::ServiciosEliminar,
        Permission::CobrosVer,
        Permission::CobrosCrear,
        Permission::CobrosEditar,
        Permission::CobrosEliminar,
        Permission::ReportesVer,
        Permission::UsuariosGestionar,
        Permission::ConfiguracionGestionar,
        Permission::RespaldosGestionar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ClientesVer => "clientes_ver",
            Permission::ClientesCrear => "clientes_crear",
            Permission::ClientesEditar => "clientes_editar",
            Permission::ClientesEliminar => "clientes_eliminar",
            Permission::ServiciosVer => "servicios_ver",
            Permission::ServiciosCrear => "servicios_crear",
            Permission::ServiciosEditar => "servicios_editar",
            Permission::ServiciosEliminar => "servicios_eliminar",
            Permission::CobrosVer => "cobros_ver",
            Permission::CobrosCrear => "cobros_crear",
            Permission::CobrosEditar => "cobros_editar",
            Permission::CobrosEliminar => "cobros_eliminar",
            Permission::ReportesVer => "reportes_ver",
            Permission::UsuariosGestionar => "usuarios_gestionar",
            Permission::ConfiguracionGestionar => "configuracion_gestionar",
            Permission::RespaldosGestionar => "respaldos_gestionar",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission: {s}"))
    }
}

/// Account record
///
/// The password hash is never serialized; use [`Account::summary`] for
/// anything that leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier
    pub id: Uuid,

    /// Login handle (unique)
    pub handle: String,

    /// Email address (unique, also accepted as login identifier)
    pub email: String,

    /// Argon2id PHC string
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Display name
    pub display_name: String,

    pub role: Role,

    /// Inactive accounts can neither log in nor use existing tokens
    pub is_active: bool,

    /// Last successful login or authenticated activity
    pub last_activity_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Convert to the public representation (without the password hash)
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            handle: self.handle.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            is_active: self.is_active,
            last_activity_at: self.last_activity_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Whether this account counts toward the active-administrator quorum
    pub fn is_active_admin(&self) -> bool {
        self.is_active && self.role.is_admin()
    }
}

/// Public account representation (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AccountSummary {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to provision an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub handle: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
}

/// Partial update of an account's profile and status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountChanges {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl AccountChanges {
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying these changes takes `current` out of the
    /// active-administrator set (deactivation or demotion).
    pub fn removes_admin(&self, current: &Account) -> bool {
        current.is_active_admin()
            && (self.is_active == Some(false) || self.role.is_some_and(|r| !r.is_admin()))
    }

    /// Apply to an in-memory copy, stamping `updated_at`
    pub fn apply(&self, account: &mut Account, now: DateTime<Utc>) {
        if let Some(name) = &self.display_name {
            account.display_name = name.clone();
        }
        if let Some(email) = &self.email {
            account.email = email.clone();
        }
        if let Some(role) = self.role {
            account.role = role;
        }
        if let Some(active) = self.is_active {
            account.is_active = active;
        }
        account.updated_at = now;
    }
}

/// Consecutive failed password checks for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLogins {
    pub count: u32,
    pub last_failure_at: DateTime<Utc>,
}

impl FailedLogins {
    /// Count after window decay: zero once the last failure is older than
    /// `window`.
    pub fn effective_count(&self, now: DateTime<Utc>, window: Duration) -> u32 {
        if now - self.last_failure_at > window {
            0
        } else {
            self.count
        }
    }

    /// Counter state after one more failure at `now`
    pub fn next(previous: Option<&FailedLogins>, now: DateTime<Utc>, window: Duration) -> Self {
        let count = previous.map_or(0, |p| p.effective_count(now, window));
        Self {
            count: count.saturating_add(1),
            last_failure_at: now,
        }
    }

    /// Whether the account is currently locked out
    pub fn is_locked(&self, now: DateTime<Utc>, window: Duration, max_attempts: u32) -> bool {
        self.effective_count(now, window) >= max_attempts
    }
}

/// Revocation state of one account's tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Revoked token ids, oldest first
    pub token_ids: VecDeque<String>,

    /// Every token issued at or before this instant is revoked
    pub revoked_before: Option<DateTime<Utc>>,
}

impl RevocationRecord {
    /// Append a token id, evicting the oldest entries beyond `cap`.
    /// Re-revoking an id already present is a no-op.
    pub fn push(&mut self, token_id: &str, cap: usize) {
        if self.token_ids.iter().any(|id| id == token_id) {
            return;
        }
        self.token_ids.push_back(token_id.to_string());
        while self.token_ids.len() > cap {
            self.token_ids.pop_front();
        }
    }

    /// Replace the record with a single cutoff at `at`
    pub fn revoke_all(&mut self, at: DateTime<Utc>) {
        self.token_ids.clear();
        self.revoked_before = Some(at);
    }

    pub fn is_revoked(&self, token_id: &str, issued_at: DateTime<Utc>) -> bool {
        if self.token_ids.iter().any(|id| id == token_id) {
            return true;
        }
        // Millisecond resolution on both sides; token claims carry ms.
        self.revoked_before
            .is_some_and(|cutoff| issued_at.timestamp_millis() <= cutoff.timestamp_millis())
    }
}

/// Persisted security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: String,
    pub account_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(role: Role, active: bool) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            handle: "ana".to_string(),
            email: "ana@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            display_name: "Ana".to_string(),
            role,
            is_active: active,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_conversion() {
        assert_eq!(Role::Administrator.as_str(), "Administrator");
        assert_eq!(Role::parse("administrator"), Some(Role::Administrator));
        assert_eq!(Role::parse("USER"), Some(Role::User));
        assert_eq!(Role::parse("viewer"), None);
        assert_eq!("User".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn test_admin_satisfies_every_role_and_permission() {
        assert!(Role::Administrator.satisfies(Role::User));
        assert!(Role::Administrator.satisfies(Role::Administrator));
        assert!(!Role::User.satisfies(Role::Administrator));
        assert!(Role::User.satisfies(Role::User));

        for permission in Permission::ALL {
            assert!(Role::Administrator.grants(*permission), "{permission}");
        }
    }

    #[test]
    fn test_user_permission_table() {
        assert!(Role::User.grants(Permission::ClientesCrear));
        assert!(Role::User.grants(Permission::ReportesVer));
        assert!(!Role::User.grants(Permission::UsuariosGestionar));
        assert!(!Role::User.grants(Permission::ClientesEliminar));
    }

    #[test]
    fn test_permission_parse_roundtrip_names() {
        assert_eq!(
            "clientes_crear".parse::<Permission>().unwrap(),
            Permission::ClientesCrear
        );
        assert!("clientes_borrar".parse::<Permission>().is_err());
        let json = serde_json::to_string(&Permission::UsuariosGestionar).unwrap();
        assert_eq!(json, "\"usuarios_gestionar\"");
    }

    #[test]
    fn test_account_never_serializes_hash() {
        let account = sample_account(Role::User, true);
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("$argon2id$"));

        let json = serde_json::to_string(&account.summary()).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn test_removes_admin() {
        let admin = sample_account(Role::Administrator, true);
        assert!(AccountChanges::deactivate().removes_admin(&admin));
        assert!(AccountChanges {
            role: Some(Role::User),
            ..Default::default()
        }
        .removes_admin(&admin));
        assert!(!AccountChanges {
            display_name: Some("New".to_string()),
            ..Default::default()
        }
        .removes_admin(&admin));

        let inactive_admin = sample_account(Role::Administrator, false);
        assert!(!AccountChanges::deactivate().removes_admin(&inactive_admin));

        let user = sample_account(Role::User, true);
        assert!(!AccountChanges::deactivate().removes_admin(&user));
    }

    #[test]
    fn test_failed_logins_decay() {
        let now = Utc::now();
        let window = Duration::minutes(30);
        let failures = FailedLogins {
            count: 5,
            last_failure_at: now,
        };

        assert_eq!(failures.effective_count(now + Duration::minutes(29), window), 5);
        assert!(failures.is_locked(now + Duration::minutes(30), window, 5));
        assert_eq!(failures.effective_count(now + Duration::minutes(31), window), 0);
        assert!(!failures.is_locked(now + Duration::minutes(31), window, 5));

        let next = FailedLogins::next(Some(&failures), now + Duration::hours(1), window);
        assert_eq!(next.count, 1);

        let next = FailedLogins::next(Some(&failures), now + Duration::minutes(1), window);
        assert_eq!(next.count, 6);

        let first = FailedLogins::next(None, now, window);
        assert_eq!(first.count, 1);
    }

    #[test]
    fn test_revocation_record_caps_fifo() {
        let mut record = RevocationRecord::default();
        for i in 0..105 {
            record.push(&format!("jti-{i}"), 100);
        }
        assert_eq!(record.token_ids.len(), 100);
        assert_eq!(record.token_ids.front().unwrap(), "jti-5");
        assert_eq!(record.token_ids.back().unwrap(), "jti-104");

        let now = Utc::now();
        assert!(!record.is_revoked("jti-4", now));
        assert!(record.is_revoked("jti-5", now));
    }

    #[test]
    fn test_revocation_push_is_idempotent() {
        let mut record = RevocationRecord::default();
        record.push("a", 100);
        record.push("a", 100);
        assert_eq!(record.token_ids.len(), 1);
    }

    #[test]
    fn test_revoke_all_cutoff() {
        let now = Utc::now();
        let mut record = RevocationRecord::default();
        record.push("old", 100);
        record.revoke_all(now);

        assert!(record.token_ids.is_empty());
        assert!(record.is_revoked("anything", now - Duration::hours(1)));
        assert!(record.is_revoked("anything", now));
        assert!(!record.is_revoked("anything", now + Duration::seconds(1)));
    }
}
