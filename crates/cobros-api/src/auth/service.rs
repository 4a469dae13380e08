//! Authentication service layer
//!
//! Orchestrates login (credential check, lockout, token issuance), token
//! verification for the middleware, password change and reset, logout and
//! administrative unlock. Collaborators are injected so tests can run on
//! the in-memory store with a manual clock.

use super::jwt::{Claims, TokenError, TokenPurpose, TokenService};
use super::middleware::AuthenticatedUser;
use super::password::{
    hash_password_blocking, needs_rehash, score_strength, verify_password_blocking,
    PasswordConfig, PasswordError,
};
use crate::audit::{AuditDispatcher, AuditEvent};
use chrono::{DateTime, Duration, Utc};
use cobros_core::{
    Account, AccountSummary, AuthConfig, Clock, CredentialStore, LoginAttemptStore, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Authentication and authorization failures
///
/// `NotFound` is internal to password-reset generation and must never be
/// surfaced distinctly to an unauthenticated caller.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Too many failed login attempts, try again later")]
    TooManyAttempts,

    #[error("Token expired, please log in again")]
    Expired,

    #[error("Invalid token")]
    Malformed,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Token cannot be used for this operation")]
    InvalidTokenPurpose,

    #[error("Password is too weak: {}", .feedback.join("; "))]
    WeakPassword { feedback: Vec<String> },

    #[error("Operation would leave no active administrator")]
    LastAdminProtected,

    #[error("Account no longer exists or is inactive")]
    StaleOrInactiveSubject,

    #[error("Not found")]
    NotFound,

    #[error("Missing authentication token")]
    MissingToken,

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::Expired,
            TokenError::Malformed => AuthError::Malformed,
            TokenError::Revoked => AuthError::Revoked,
            TokenError::Encoding(e) => AuthError::Internal(format!("token encoding: {e}")),
            TokenError::Store(e) => AuthError::Internal(format!("revocation store: {e}")),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict(what) => AuthError::Conflict(what),
            StoreError::LastAdminProtected => AuthError::LastAdminProtected,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// Successful login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub account: AccountSummary,
}

/// Freshly issued password-reset token
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub token: String,
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Lockout thresholds
#[derive(Debug, Clone, Copy)]
pub struct LoginPolicy {
    pub max_failed_attempts: u32,
    pub lockout_window: Duration,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_window: Duration::minutes(30),
        }
    }
}

impl From<&AuthConfig> for LoginPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts,
            lockout_window: Duration::seconds(config.lockout_window_secs as i64),
        }
    }
}

/// Authentication service
pub struct AuthService {
    accounts: Arc<dyn CredentialStore>,
    attempts: Arc<dyn LoginAttemptStore>,
    tokens: Arc<TokenService>,
    audit: AuditDispatcher,
    clock: Arc<dyn Clock>,
    policy: LoginPolicy,
    password_config: PasswordConfig,
    /// Digest checked against when the identifier matches no account
    dummy_hash: OnceCell<String>,
}

const DUMMY_PASSWORD: &str = "cobros-unknown-account";

impl AuthService {
    pub fn new(
        accounts: Arc<dyn CredentialStore>,
        attempts: Arc<dyn LoginAttemptStore>,
        tokens: Arc<TokenService>,
        audit: AuditDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            attempts,
            tokens,
            audit,
            clock,
            policy: LoginPolicy::default(),
            password_config: PasswordConfig::default(),
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn with_policy(mut self, policy: LoginPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self.dummy_hash = OnceCell::new();
        self
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Authenticate with handle or email and password
    ///
    /// The lockout is evaluated before the password is checked, so a locked
    /// account rejects even the correct password until the window passes or
    /// an administrator unlocks it.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let Some(account) = self.accounts.find_by_handle_or_email(identifier).await? else {
            self.verify_dummy(password).await;
            self.login_failed(identifier, None, "unknown_identifier", None);
            return Err(AuthError::InvalidCredentials);
        };

        if !account.is_active {
            self.login_failed(identifier, Some(account.id), "account_inactive", None);
            return Err(AuthError::AccountInactive);
        }

        let now = self.clock.now();
        let failures = self.attempts.get(account.id).await?;
        if let Some(failures) = failures {
            if failures.is_locked(now, self.policy.lockout_window, self.policy.max_failed_attempts)
            {
                self.audit.record(AuditEvent::LoginFailure {
                    identifier: identifier.to_string(),
                    account_id: Some(account.id),
                    reason: "account_locked".to_string(),
                    failed_attempts: Some(failures.count),
                    account_locked: true,
                });
                return Err(AuthError::TooManyAttempts);
            }
        }

        if !self.password_matches(&account, password).await? {
            let count = match self
                .attempts
                .record_failure(account.id, now, self.policy.lockout_window)
                .await
            {
                Ok(state) => Some(state.count),
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "Failed to record login failure");
                    None
                }
            };
            let locked = count.is_some_and(|c| c >= self.policy.max_failed_attempts);
            self.login_failed(identifier, Some(account.id), "invalid_password", count);
            if count == Some(self.policy.max_failed_attempts) {
                self.audit.record(AuditEvent::AccountLocked {
                    account_id: account.id,
                    handle: account.handle.clone(),
                    failed_attempts: self.policy.max_failed_attempts,
                });
            }
            debug!(account_id = %account.id, locked, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if let Err(e) = self.attempts.clear(account.id).await {
            warn!(account_id = %account.id, error = %e, "Failed to clear login failures");
        }

        let token = self.tokens.issue_session(&account)?;

        if let Err(e) = self.accounts.touch_last_activity(account.id, now).await {
            warn!(account_id = %account.id, error = %e, "Failed to update last activity");
        }
        self.rehash_if_needed(&account, password).await;

        self.audit.record(AuditEvent::LoginSuccess {
            account_id: account.id,
            handle: account.handle.clone(),
        });

        let mut summary = account.summary();
        summary.last_activity_at = Some(now);

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_at: now + self.tokens.config().session_ttl,
            account: summary,
        })
    }

    /// Verify a session token and re-check its subject
    ///
    /// A token stays structurally valid for its whole lifetime, so the
    /// subject is re-fetched on every call: a deleted or deactivated account
    /// fails with [`AuthError::StaleOrInactiveSubject`].
    pub async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.tokens.verify(token).await?;
        if !claims.has_purpose(TokenPurpose::Session) {
            return Err(AuthError::Malformed);
        }

        let account = self
            .accounts
            .find_by_id(claims.subject()?)
            .await?
            .filter(|account| account.is_active)
            .ok_or(AuthError::StaleOrInactiveSubject)?;

        Ok(AuthenticatedUser {
            account_id: account.id,
            handle: account.handle,
            role: account.role,
            token_id: claims.jti,
        })
    }

    /// Replace an account's password and revoke all of its sessions
    pub async fn change_password(
        &self,
        account_id: Uuid,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.replace_password(account_id, new_password, false).await
    }

    /// Self-service password change; the current password must match
    pub async fn change_own_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.password_matches(&account, current_password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        self.replace_password(account_id, new_password, false).await
    }

    /// Issue a password-reset token for the account behind `identifier`
    ///
    /// Fails with `NotFound` for unknown identifiers. HTTP callers must not
    /// let that difference show in the response.
    pub async fn generate_reset_token(&self, identifier: &str) -> Result<ResetToken, AuthError> {
        let account = self
            .accounts
            .find_by_handle_or_email(identifier)
            .await?
            .ok_or(AuthError::NotFound)?;

        let token = self.tokens.issue_password_reset(&account)?;
        self.audit.record(AuditEvent::PasswordResetRequested {
            account_id: account.id,
        });

        Ok(ResetToken {
            token,
            account_id: account.id,
            expires_at: self.clock.now() + self.tokens.config().reset_ttl,
        })
    }

    /// Set a new password using a password-reset token
    ///
    /// The reset token itself is covered by the revoke-all that follows the
    /// change, so it cannot be replayed.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let claims: Claims = self.tokens.verify(token).await?;
        if !claims.has_purpose(TokenPurpose::PasswordReset) {
            return Err(AuthError::InvalidTokenPurpose);
        }

        self.replace_password(claims.subject()?, new_password, true)
            .await
    }

    /// Revoke the presented token, or every token of its subject
    pub async fn logout(&self, token: &str, all_sessions: bool) -> Result<(), AuthError> {
        let claims = self.tokens.decode_unverified(token)?;
        let account_id = claims.subject()?;

        self.tokens.revoke(token).await?;
        if all_sessions {
            self.tokens.revoke_all(account_id).await?;
        }

        self.audit.record(AuditEvent::Logout {
            account_id,
            all_sessions,
        });
        Ok(())
    }

    /// Clear the failed-login counter of an account
    pub async fn unlock(&self, account_id: Uuid, unlocked_by: Option<Uuid>) -> Result<(), AuthError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        self.attempts.clear(account_id).await?;
        self.audit.record(AuditEvent::AccountUnlocked {
            account_id,
            unlocked_by,
        });
        Ok(())
    }

    /// Profile of the given account, without the password hash
    pub async fn current_account(&self, account_id: Uuid) -> Result<AccountSummary, AuthError> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .map(|account| account.summary())
            .ok_or(AuthError::NotFound)
    }

    async fn replace_password(
        &self,
        account_id: Uuid,
        new_password: &str,
        via_reset: bool,
    ) -> Result<(), AuthError> {
        let strength = score_strength(new_password);
        if !strength.valid {
            return Err(AuthError::WeakPassword {
                feedback: strength.feedback,
            });
        }

        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        let hash =
            hash_password_blocking(new_password.to_string(), self.password_config.clone()).await?;
        self.accounts.set_password_hash(account_id, &hash).await?;
        self.tokens.revoke_all(account_id).await?;

        self.audit.record(AuditEvent::PasswordChanged {
            account_id,
            via_reset,
        });
        Ok(())
    }

    /// An unparseable stored digest counts as a mismatch
    async fn password_matches(&self, account: &Account, password: &str) -> Result<bool, AuthError> {
        match verify_password_blocking(password.to_string(), account.password_hash.clone()).await {
            Ok(matches) => Ok(matches),
            Err(PasswordError::InvalidHashFormat) => {
                warn!(account_id = %account.id, "Stored password hash is not a valid PHC string");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify against a fixed digest when the identifier matches no account
    async fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| {
                hash_password_blocking(DUMMY_PASSWORD.to_string(), self.password_config.clone())
            })
            .await;

        match dummy {
            Ok(hash) => {
                let _ = verify_password_blocking(password.to_string(), hash.clone()).await;
            }
            Err(e) => warn!(error = %e, "Failed to prepare dummy password hash"),
        }
    }

    async fn rehash_if_needed(&self, account: &Account, password: &str) {
        if !needs_rehash(&account.password_hash, &self.password_config) {
            return;
        }

        let result =
            match hash_password_blocking(password.to_string(), self.password_config.clone()).await
            {
                Ok(hash) => self
                    .accounts
                    .set_password_hash(account.id, &hash)
                    .await
                    .map_err(AuthError::from),
                Err(e) => Err(e.into()),
            };

        match result {
            Ok(()) => debug!(account_id = %account.id, "Password hash upgraded"),
            Err(e) => warn!(account_id = %account.id, error = %e, "Failed to upgrade password hash"),
        }
    }

    fn login_failed(
        &self,
        identifier: &str,
        account_id: Option<Uuid>,
        reason: &str,
        failed_attempts: Option<u32>,
    ) {
        self.audit.record(AuditEvent::LoginFailure {
            identifier: identifier.to_string(),
            account_id,
            reason: reason.to_string(),
            failed_attempts,
            account_locked: failed_attempts.is_some_and(|c| c >= self.policy.max_failed_attempts),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenConfig;
    use crate::auth::password::{hash_password_with_config, test_config, verify_password};
    use cobros_core::{
        AccountChanges, FailedLogins, ManualClock, MemoryStore, NewAccount, Role, StoreResult,
    };

    struct Harness {
        service: AuthService,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        audit: AuditDispatcher,
    }

    fn harness() -> Harness {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        let tokens = Arc::new(TokenService::new(
            TokenConfig {
                secret: "service-test-secret".to_string(),
                issuer: "cobros-api".to_string(),
                session_ttl: Duration::hours(8),
                reset_ttl: Duration::minutes(15),
                revocation_cap: 100,
            },
            store.clone(),
            shared.clone(),
        ));
        let (audit, _) = AuditDispatcher::spawn(
            vec![Arc::new(crate::audit::StoreSink::new(store.clone()))],
            shared.clone(),
        );
        let service = AuthService::new(store.clone(), store.clone(), tokens, audit.clone(), shared)
            .with_password_config(test_config());

        Harness {
            service,
            store,
            clock,
            audit,
        }
    }

    async fn seed(store: &MemoryStore, handle: &str, password: &str, role: Role) -> Account {
        store
            .create_account(NewAccount {
                handle: handle.to_string(),
                email: format!("{handle}@example.com"),
                password_hash: hash_password_with_config(password, &test_config()).unwrap(),
                display_name: handle.to_string(),
                role,
                is_active: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_by_handle_and_email() {
        let h = harness();
        let account = seed(&h.store, "admin", "Adm1n#Secure", Role::Administrator).await;

        let response = h.service.login("admin", "Adm1n#Secure").await.unwrap();
        assert_eq!(response.account.id, account.id);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_at, h.clock.now() + Duration::hours(8));
        assert_eq!(response.account.last_activity_at, Some(h.clock.now()));

        let user = h.service.verify_token(&response.token).await.unwrap();
        assert_eq!(user.role, Role::Administrator);
        assert_eq!(user.handle, "admin");
        assert!(user.role.satisfies(Role::User));

        assert!(h
            .service
            .login("admin@example.com", "Adm1n#Secure")
            .await
            .is_ok());

        let stored = h.store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.last_activity_at, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_identifier_match_is_case_sensitive() {
        let h = harness();
        seed(&h.store, "admin", "Adm1n#Secure", Role::Administrator).await;

        assert!(matches!(
            h.service.login("ADMIN", "Adm1n#Secure").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_unknown_identifier_and_wrong_password_look_alike() {
        let h = harness();
        seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        let unknown = h.service.login("nobody", "whatever").await.unwrap_err();
        let wrong = h.service.login("ana", "wrong").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_unknown_identifier_still_verifies_a_hash() {
        let h = harness();
        assert!(h.service.dummy_hash.get().is_none());

        let err = h.service.login("nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // Same cost parameters as real digests, so the verification takes as long
        let dummy = h.service.dummy_hash.get().expect("dummy hash prepared");
        assert!(!needs_rehash(dummy, &test_config()));
        assert!(verify_password(DUMMY_PASSWORD, dummy).unwrap());
    }

    #[tokio::test]
    async fn test_inactive_account_rejected() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        h.store
            .update_account(account.id, AccountChanges::deactivate())
            .await
            .unwrap();

        assert!(matches!(
            h.service.login("ana", "Secret#2024x").await,
            Err(AuthError::AccountInactive)
        ));
    }

    #[tokio::test]
    async fn test_lockout_after_five_failures_then_window_expiry() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        for _ in 0..5 {
            assert!(matches!(
                h.service.login("ana", "wrong").await,
                Err(AuthError::InvalidCredentials)
            ));
        }

        assert!(matches!(
            h.service.login("ana", "Secret#2024x").await,
            Err(AuthError::TooManyAttempts)
        ));

        h.clock.advance(Duration::minutes(31));
        assert!(h.service.login("ana", "Secret#2024x").await.is_ok());
        assert_eq!(h.store.get(account.id).await.unwrap(), None);

        h.audit.flush().await;
        let events: Vec<String> = h
            .store
            .audit_records()
            .await
            .into_iter()
            .map(|r| r.event_type)
            .collect();
        assert_eq!(events.iter().filter(|e| *e == "account_locked").count(), 1);
        assert_eq!(events.last().map(String::as_str), Some("login_success"));
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        for _ in 0..4 {
            let _ = h.service.login("ana", "wrong").await;
        }
        h.service.login("ana", "Secret#2024x").await.unwrap();
        assert_eq!(h.store.get(account.id).await.unwrap(), None);

        let _ = h.service.login("ana", "wrong").await;
        assert_eq!(h.store.get(account.id).await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_unlock_clears_lockout() {
        let h = harness();
        let admin = seed(&h.store, "admin", "Adm1n#Secure", Role::Administrator).await;
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        for _ in 0..5 {
            let _ = h.service.login("ana", "wrong").await;
        }

        h.service.unlock(account.id, Some(admin.id)).await.unwrap();
        assert!(h.service.login("ana", "Secret#2024x").await.is_ok());

        assert!(matches!(
            h.service.unlock(Uuid::new_v4(), None).await,
            Err(AuthError::NotFound)
        ));
    }

    struct BrokenAttempts;

    #[async_trait::async_trait]
    impl LoginAttemptStore for BrokenAttempts {
        async fn get(&self, _: Uuid) -> StoreResult<Option<FailedLogins>> {
            Ok(None)
        }

        async fn record_failure(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
            _: Duration,
        ) -> StoreResult<FailedLogins> {
            Err(StoreError::Database("disk full".to_string()))
        }

        async fn clear(&self, _: Uuid) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_increment_is_best_effort() {
        let h = harness();
        seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        let service = AuthService::new(
            h.store.clone(),
            Arc::new(BrokenAttempts),
            h.service.tokens().clone(),
            h.audit.clone(),
            Arc::new(h.clock.clone()),
        )
        .with_password_config(test_config());

        assert!(matches!(
            service.login("ana", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_change_password_revokes_existing_sessions() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        let old = h.service.login("ana", "Secret#2024x").await.unwrap().token;

        h.service
            .change_password(account.id, "N3w&Better!pass")
            .await
            .unwrap();
        assert!(matches!(
            h.service.verify_token(&old).await,
            Err(AuthError::Revoked)
        ));

        h.clock.advance(Duration::seconds(1));
        assert!(matches!(
            h.service.login("ana", "Secret#2024x").await,
            Err(AuthError::InvalidCredentials)
        ));
        let fresh = h.service.login("ana", "N3w&Better!pass").await.unwrap().token;
        assert!(h.service.verify_token(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_weak_password_rejected_with_feedback() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        match h.service.change_password(account.id, "abc").await {
            Err(AuthError::WeakPassword { feedback }) => assert!(!feedback.is_empty()),
            other => panic!("expected WeakPassword, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_change_own_password_checks_current() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        assert!(matches!(
            h.service
                .change_own_password(account.id, "wrong", "N3w&Better!pass")
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        h.service
            .change_own_password(account.id, "Secret#2024x", "N3w&Better!pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_flow() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        assert!(matches!(
            h.service.generate_reset_token("ghost").await,
            Err(AuthError::NotFound)
        ));

        let reset = h.service.generate_reset_token("ana@example.com").await.unwrap();
        assert_eq!(reset.account_id, account.id);
        assert_eq!(reset.expires_at, h.clock.now() + Duration::minutes(15));

        // A reset token is not a session
        assert!(matches!(
            h.service.verify_token(&reset.token).await,
            Err(AuthError::Malformed)
        ));

        h.service
            .reset_password(&reset.token, "R3set&Strong!")
            .await
            .unwrap();

        // Single use
        assert!(matches!(
            h.service.reset_password(&reset.token, "An0ther&Strong!").await,
            Err(AuthError::Revoked)
        ));

        h.clock.advance(Duration::seconds(1));
        assert!(h.service.login("ana", "R3set&Strong!").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_requires_reset_purpose_and_fresh_token() {
        let h = harness();
        seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        let session = h.service.login("ana", "Secret#2024x").await.unwrap().token;
        assert!(matches!(
            h.service.reset_password(&session, "R3set&Strong!").await,
            Err(AuthError::InvalidTokenPurpose)
        ));

        let reset = h.service.generate_reset_token("ana").await.unwrap();
        h.clock.advance(Duration::minutes(16));
        assert!(matches!(
            h.service.reset_password(&reset.token, "R3set&Strong!").await,
            Err(AuthError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_stale_subject_rejected() {
        let h = harness();
        seed(&h.store, "admin", "Adm1n#Secure", Role::Administrator).await;
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        let token = h.service.login("ana", "Secret#2024x").await.unwrap().token;

        h.store
            .update_account(account.id, AccountChanges::deactivate())
            .await
            .unwrap();
        assert!(matches!(
            h.service.verify_token(&token).await,
            Err(AuthError::StaleOrInactiveSubject)
        ));

        h.store.delete_account(account.id).await.unwrap();
        assert!(matches!(
            h.service.verify_token(&token).await,
            Err(AuthError::StaleOrInactiveSubject)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_presented_token() {
        let h = harness();
        seed(&h.store, "ana", "Secret#2024x", Role::User).await;
        let first = h.service.login("ana", "Secret#2024x").await.unwrap().token;
        let second = h.service.login("ana", "Secret#2024x").await.unwrap().token;

        h.service.logout(&first, false).await.unwrap();
        assert!(matches!(
            h.service.verify_token(&first).await,
            Err(AuthError::Revoked)
        ));
        assert!(h.service.verify_token(&second).await.is_ok());

        h.service.logout(&second, true).await.unwrap();
        assert!(h.service.verify_token(&second).await.is_err());
    }

    #[tokio::test]
    async fn test_login_upgrades_weak_hash() {
        let h = harness();
        let weak = PasswordConfig {
            memory_cost: 512,
            ..test_config()
        };
        let account = h
            .store
            .create_account(NewAccount {
                handle: "ana".to_string(),
                email: "ana@example.com".to_string(),
                password_hash: hash_password_with_config("Secret#2024x", &weak).unwrap(),
                display_name: "Ana".to_string(),
                role: Role::User,
                is_active: true,
            })
            .await
            .unwrap();

        h.service.login("ana", "Secret#2024x").await.unwrap();

        let stored = h.store.find_by_id(account.id).await.unwrap().unwrap();
        assert!(!needs_rehash(&stored.password_hash, &test_config()));
        assert!(h.service.login("ana", "Secret#2024x").await.is_ok());
    }

    #[tokio::test]
    async fn test_current_account_omits_hash() {
        let h = harness();
        let account = seed(&h.store, "ana", "Secret#2024x", Role::User).await;

        let summary = h.service.current_account(account.id).await.unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("argon2"));
    }
}
