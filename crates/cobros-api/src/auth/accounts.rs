//! Account administration
//!
//! Provisioning and maintenance of accounts by administrators. The
//! last-active-administrator rule is enforced by the store, atomically with
//! each mutation; this layer adds password policy, session revocation on
//! deactivation or role change, and auditing.

use super::jwt::TokenService;
use super::password::{hash_password_blocking, score_strength, PasswordConfig};
use super::service::AuthError;
use crate::audit::{AuditDispatcher, AuditEvent};
use cobros_core::{AccountChanges, AccountSummary, CredentialStore, NewAccount, Role};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Input for [`AccountService::create_account`]
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: Role,
    pub is_active: bool,
}

/// Account administration service
pub struct AccountService {
    accounts: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    audit: AuditDispatcher,
    password_config: PasswordConfig,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            accounts,
            tokens,
            audit,
            password_config: PasswordConfig::default(),
        }
    }

    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self
    }

    /// Provision a new account with a strength-checked password
    pub async fn create_account(
        &self,
        input: CreateAccount,
        created_by: Option<Uuid>,
    ) -> Result<AccountSummary, AuthError> {
        let handle = input.handle.trim();
        let email = input.email.trim();
        if handle.is_empty() || email.is_empty() {
            return Err(AuthError::Validation(
                "handle and email are required".to_string(),
            ));
        }

        let strength = score_strength(&input.password);
        if !strength.valid {
            return Err(AuthError::WeakPassword {
                feedback: strength.feedback,
            });
        }

        let password_hash =
            hash_password_blocking(input.password, self.password_config.clone()).await?;

        let account = self
            .accounts
            .create_account(NewAccount {
                handle: handle.to_string(),
                email: email.to_string(),
                password_hash,
                display_name: input.display_name.trim().to_string(),
                role: input.role,
                is_active: input.is_active,
            })
            .await?;

        info!(account_id = %account.id, handle = %account.handle, role = %account.role, "Account created");
        self.audit.record(AuditEvent::AccountCreated {
            account_id: account.id,
            handle: account.handle.clone(),
            role: account.role,
            created_by,
        });

        Ok(account.summary())
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountSummary>, AuthError> {
        Ok(self
            .accounts
            .list_accounts()
            .await?
            .iter()
            .map(|account| account.summary())
            .collect())
    }

    pub async fn get_account(&self, id: Uuid) -> Result<AccountSummary, AuthError> {
        self.accounts
            .find_by_id(id)
            .await?
            .map(|account| account.summary())
            .ok_or(AuthError::NotFound)
    }

    /// Apply profile, role or status changes
    ///
    /// Deactivation and any role change revoke every session of the
    /// account, since tokens carry the role they were issued with.
    pub async fn update_account(
        &self,
        id: Uuid,
        changes: AccountChanges,
        updated_by: Option<Uuid>,
    ) -> Result<AccountSummary, AuthError> {
        let current = self
            .accounts
            .find_by_id(id)
            .await?
            .ok_or(AuthError::NotFound)?;
        if changes.is_empty() {
            return Ok(current.summary());
        }

        let revoke_sessions = (changes.is_active == Some(false) && current.is_active)
            || changes.role.is_some_and(|role| role != current.role);
        let fields = changed_fields(&changes);

        let updated = self.accounts.update_account(id, changes).await?;

        if revoke_sessions {
            self.tokens.revoke_all(id).await?;
            self.audit.record(AuditEvent::SessionsRevoked {
                account_id: id,
                revoked_by: updated_by,
            });
        }
        self.audit.record(AuditEvent::AccountUpdated {
            account_id: id,
            fields,
            updated_by,
        });

        Ok(updated.summary())
    }

    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        updated_by: Option<Uuid>,
    ) -> Result<AccountSummary, AuthError> {
        let changes = AccountChanges {
            is_active: Some(active),
            ..Default::default()
        };
        self.update_account(id, changes, updated_by).await
    }

    /// Remove an account; refused for the last active administrator
    pub async fn delete_account(&self, id: Uuid, deleted_by: Option<Uuid>) -> Result<(), AuthError> {
        self.accounts.delete_account(id).await?;

        info!(account_id = %id, "Account deleted");
        self.audit.record(AuditEvent::AccountDeleted {
            account_id: id,
            deleted_by,
        });
        Ok(())
    }

    /// Revoke every outstanding token of an account
    pub async fn revoke_sessions(&self, id: Uuid, revoked_by: Option<Uuid>) -> Result<(), AuthError> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or(AuthError::NotFound)?;

        self.tokens.revoke_all(id).await?;
        self.audit.record(AuditEvent::SessionsRevoked {
            account_id: id,
            revoked_by,
        });
        Ok(())
    }
}

fn changed_fields(changes: &AccountChanges) -> Vec<String> {
    [
        ("display_name", changes.display_name.is_some()),
        ("email", changes.email.is_some()),
        ("role", changes.role.is_some()),
        ("is_active", changes.is_active.is_some()),
    ]
    .into_iter()
    .filter(|(_, changed)| *changed)
    .map(|(name, _)| name.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenConfig, TokenError, TokenPurpose};
    use crate::auth::password::test_config;
    use chrono::Duration;
    use cobros_core::{Clock, ManualClock, MemoryStore};

    struct Harness {
        service: AccountService,
        tokens: Arc<TokenService>,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        let tokens = Arc::new(TokenService::new(
            TokenConfig {
                secret: "accounts-test-secret".to_string(),
                issuer: "cobros-api".to_string(),
                session_ttl: Duration::hours(8),
                reset_ttl: Duration::minutes(15),
                revocation_cap: 100,
            },
            store.clone(),
            shared.clone(),
        ));
        let (audit, _) = AuditDispatcher::spawn(vec![], shared);
        let service = AccountService::new(store, tokens.clone(), audit)
            .with_password_config(test_config());
        Harness {
            service,
            tokens,
            clock,
        }
    }

    fn input(handle: &str, role: Role) -> CreateAccount {
        CreateAccount {
            handle: handle.to_string(),
            email: format!("{handle}@example.com"),
            display_name: handle.to_uppercase(),
            password: "Str0ng&Secret".to_string(),
            role,
            is_active: true,
        }
    }

    fn session(tokens: &TokenService, account: &AccountSummary) -> String {
        tokens
            .issue(
                account.id,
                &account.handle,
                account.role,
                TokenPurpose::Session,
                Duration::hours(8),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list_accounts() {
        let h = harness();
        let admin = h
            .service
            .create_account(input("admin", Role::Administrator), None)
            .await
            .unwrap();
        h.service
            .create_account(input("ana", Role::User), Some(admin.id))
            .await
            .unwrap();

        let accounts = h.service.list_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(h.service.get_account(admin.id).await.unwrap().handle, "admin");
        assert!(matches!(
            h.service.get_account(Uuid::new_v4()).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_weak_password_and_duplicates() {
        let h = harness();
        let mut weak = input("ana", Role::User);
        weak.password = "12345".to_string();
        assert!(matches!(
            h.service.create_account(weak, None).await,
            Err(AuthError::WeakPassword { .. })
        ));

        h.service.create_account(input("ana", Role::User), None).await.unwrap();
        assert!(matches!(
            h.service.create_account(input("ana", Role::User), None).await,
            Err(AuthError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_sole_admin_cannot_be_deactivated_demoted_or_deleted() {
        let h = harness();
        let admin = h
            .service
            .create_account(input("admin", Role::Administrator), None)
            .await
            .unwrap();

        assert!(matches!(
            h.service.set_active(admin.id, false, Some(admin.id)).await,
            Err(AuthError::LastAdminProtected)
        ));
        let demote = AccountChanges {
            role: Some(Role::User),
            ..Default::default()
        };
        assert!(matches!(
            h.service.update_account(admin.id, demote, None).await,
            Err(AuthError::LastAdminProtected)
        ));
        assert!(matches!(
            h.service.delete_account(admin.id, Some(admin.id)).await,
            Err(AuthError::LastAdminProtected)
        ));
        assert!(h.service.get_account(admin.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_one_of_two_admins_can_be_deactivated() {
        let h = harness();
        let first = h
            .service
            .create_account(input("admin", Role::Administrator), None)
            .await
            .unwrap();
        let second = h
            .service
            .create_account(input("backup", Role::Administrator), None)
            .await
            .unwrap();

        let updated = h.service.set_active(second.id, false, Some(first.id)).await.unwrap();
        assert!(!updated.is_active);

        assert!(matches!(
            h.service.set_active(first.id, false, Some(first.id)).await,
            Err(AuthError::LastAdminProtected)
        ));
    }

    #[tokio::test]
    async fn test_deactivation_and_role_change_revoke_sessions() {
        let h = harness();
        h.service
            .create_account(input("admin", Role::Administrator), None)
            .await
            .unwrap();
        let ana = h.service.create_account(input("ana", Role::User), None).await.unwrap();
        let beto = h.service.create_account(input("beto", Role::User), None).await.unwrap();

        let ana_token = session(&h.tokens, &ana);
        let beto_token = session(&h.tokens, &beto);

        let rename = AccountChanges {
            display_name: Some("Ana María".to_string()),
            ..Default::default()
        };
        h.service.update_account(ana.id, rename, None).await.unwrap();
        assert!(h.tokens.verify(&ana_token).await.is_ok());

        h.service.set_active(ana.id, false, None).await.unwrap();
        assert!(matches!(
            h.tokens.verify(&ana_token).await,
            Err(TokenError::Revoked)
        ));

        let promote = AccountChanges {
            role: Some(Role::Administrator),
            ..Default::default()
        };
        let promoted = h.service.update_account(beto.id, promote, None).await.unwrap();
        assert_eq!(promoted.role, Role::Administrator);
        assert!(matches!(
            h.tokens.verify(&beto_token).await,
            Err(TokenError::Revoked)
        ));

        h.clock.advance(Duration::seconds(1));
        assert!(h.tokens.verify(&session(&h.tokens, &promoted)).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_sessions_and_delete() {
        let h = harness();
        h.service
            .create_account(input("admin", Role::Administrator), None)
            .await
            .unwrap();
        let ana = h.service.create_account(input("ana", Role::User), None).await.unwrap();
        let token = session(&h.tokens, &ana);

        h.service.revoke_sessions(ana.id, None).await.unwrap();
        assert!(h.tokens.verify(&token).await.is_err());
        assert!(matches!(
            h.service.revoke_sessions(Uuid::new_v4(), None).await,
            Err(AuthError::NotFound)
        ));

        h.service.delete_account(ana.id, None).await.unwrap();
        assert!(matches!(
            h.service.delete_account(ana.id, None).await,
            Err(AuthError::NotFound)
        ));
    }

    #[test]
    fn test_changed_fields() {
        let changes = AccountChanges {
            email: Some("new@example.com".to_string()),
            is_active: Some(true),
            ..Default::default()
        };
        assert_eq!(changed_fields(&changes), vec!["email", "is_active"]);
    }
}
