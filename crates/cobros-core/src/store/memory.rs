//! In-process store
//!
//! Implements every store trait over one mutex-guarded state, which also
//! serialises the last-administrator check with its mutation. Used by the
//! test suites and by tooling that runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuditStore, CredentialStore, LoginAttemptStore, RevocationStore, StoreError, StoreResult,
};
use crate::clock::{Clock, SystemClock};
use crate::models::{
    Account, AccountChanges, AuditRecord, FailedLogins, NewAccount, RevocationRecord,
};

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    revocations: HashMap<Uuid, RevocationRecord>,
    failures: HashMap<Uuid, FailedLogins>,
    audit: Vec<AuditRecord>,
}

impl State {
    fn active_admins_excluding(&self, excluding: Option<Uuid>) -> i64 {
        self.accounts
            .iter()
            .filter(|a| a.is_active_admin() && Some(a.id) != excluding)
            .count() as i64
    }

    fn position(&self, id: Uuid) -> StoreResult<usize> {
        self.accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or(StoreError::NotFound)
    }
}

/// Mutex-guarded in-memory implementation of all store traits
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose `created_at`/`updated_at` stamps come from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    /// Snapshot of the persisted audit trail
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.lock().await.audit.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        // A handle match wins over another account's email
        Ok(state
            .accounts
            .iter()
            .find(|a| a.handle == identifier)
            .or_else(|| state.accounts.iter().find(|a| a.email == identifier))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let state = self.state.lock().await;
        let mut accounts = state.accounts.clone();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let mut state = self.state.lock().await;
        if state.accounts.iter().any(|a| a.handle == account.handle) {
            return Err(StoreError::Conflict("accounts_handle_key".to_string()));
        }
        if state.accounts.iter().any(|a| a.email == account.email) {
            return Err(StoreError::Conflict("accounts_email_key".to_string()));
        }

        let now = self.clock.now();
        let created = Account {
            id: Uuid::new_v4(),
            handle: account.handle,
            email: account.email,
            password_hash: account.password_hash,
            display_name: account.display_name,
            role: account.role,
            is_active: account.is_active,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        };
        state.accounts.push(created.clone());
        Ok(created)
    }

    async fn count_active_admins(&self, excluding: Option<Uuid>) -> StoreResult<i64> {
        Ok(self.state.lock().await.active_admins_excluding(excluding))
    }

    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> StoreResult<Account> {
        let mut state = self.state.lock().await;
        let idx = state.position(id)?;

        if let Some(email) = &changes.email {
            if state.accounts.iter().any(|a| a.id != id && &a.email == email) {
                return Err(StoreError::Conflict("accounts_email_key".to_string()));
            }
        }
        if changes.removes_admin(&state.accounts[idx]) && state.active_admins_excluding(Some(id)) == 0
        {
            return Err(StoreError::LastAdminProtected);
        }

        let now = self.clock.now();
        let account = &mut state.accounts[idx];
        changes.apply(account, now);
        Ok(account.clone())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let idx = state.position(id)?;
        let now = self.clock.now();
        let account = &mut state.accounts[idx];
        account.password_hash = password_hash.to_string();
        account.updated_at = now;
        Ok(())
    }

    async fn touch_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let idx = state.position(id)?;
        state.accounts[idx].last_activity_at = Some(at);
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let idx = state.position(id)?;
        if state.accounts[idx].is_active_admin() && state.active_admins_excluding(Some(id)) == 0 {
            return Err(StoreError::LastAdminProtected);
        }
        state.accounts.remove(idx);
        state.revocations.remove(&id);
        state.failures.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn revoke_token(
        &self,
        account_id: Uuid,
        token_id: &str,
        _at: DateTime<Utc>,
        cap: usize,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .revocations
            .entry(account_id)
            .or_default()
            .push(token_id, cap);
        Ok(())
    }

    async fn revoke_all(&self, account_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.revocations.entry(account_id).or_default().revoke_all(at);
        Ok(())
    }

    async fn load(&self, account_id: Uuid) -> StoreResult<RevocationRecord> {
        let state = self.state.lock().await;
        Ok(state
            .revocations
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStore {
    async fn get(&self, account_id: Uuid) -> StoreResult<Option<FailedLogins>> {
        Ok(self.state.lock().await.failures.get(&account_id).copied())
    }

    async fn record_failure(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<FailedLogins> {
        let mut state = self.state.lock().await;
        let next = FailedLogins::next(state.failures.get(&account_id), at, window);
        state.failures.insert(account_id, next);
        Ok(next)
    }

    async fn clear(&self, account_id: Uuid) -> StoreResult<()> {
        self.state.lock().await.failures.remove(&account_id);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        self.state.lock().await.audit.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn new_account(handle: &str, role: Role) -> NewAccount {
        NewAccount {
            handle: handle.to_string(),
            email: format!("{handle}@example.com"),
            password_hash: "hash".to_string(),
            display_name: handle.to_string(),
            role,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_handle_or_email_is_exact() {
        let store = MemoryStore::new();
        let created = store
            .create_account(new_account("admin", Role::Administrator))
            .await
            .unwrap();

        let by_handle = store.find_by_handle_or_email("admin").await.unwrap();
        assert_eq!(by_handle.unwrap().id, created.id);

        let by_email = store
            .find_by_handle_or_email("admin@example.com")
            .await
            .unwrap();
        assert_eq!(by_email.unwrap().id, created.id);

        assert!(store.find_by_handle_or_email("ADMIN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_match_preferred_over_email() {
        let store = MemoryStore::new();
        store.create_account(new_account("ana", Role::User)).await.unwrap();
        let mut other = new_account("ana@example.com", Role::User);
        other.email = "luis@example.com".to_string();
        let other = store.create_account(other).await.unwrap();

        let found = store
            .find_by_handle_or_email("ana@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, other.id);
    }

    #[tokio::test]
    async fn test_duplicate_handle_conflicts() {
        let store = MemoryStore::new();
        store.create_account(new_account("ana", Role::User)).await.unwrap();
        let err = store
            .create_account(new_account("ana", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sole_admin_cannot_be_deactivated_or_deleted() {
        let store = MemoryStore::new();
        let admin = store
            .create_account(new_account("admin", Role::Administrator))
            .await
            .unwrap();

        let err = store
            .update_account(admin.id, AccountChanges::deactivate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LastAdminProtected));

        let err = store
            .update_account(
                admin.id,
                AccountChanges {
                    role: Some(Role::User),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LastAdminProtected));

        let err = store.delete_account(admin.id).await.unwrap_err();
        assert!(matches!(err, StoreError::LastAdminProtected));

        let still = store.find_by_id(admin.id).await.unwrap().unwrap();
        assert!(still.is_active_admin());
    }

    #[tokio::test]
    async fn test_one_of_two_admins_can_be_deactivated() {
        let store = MemoryStore::new();
        let first = store
            .create_account(new_account("admin", Role::Administrator))
            .await
            .unwrap();
        let second = store
            .create_account(new_account("boss", Role::Administrator))
            .await
            .unwrap();

        let updated = store
            .update_account(first.id, AccountChanges::deactivate())
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(store.count_active_admins(None).await.unwrap(), 1);

        let err = store
            .update_account(second.id, AccountChanges::deactivate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LastAdminProtected));
    }

    #[tokio::test]
    async fn test_concurrent_deactivations_leave_one_admin() {
        let store = MemoryStore::new();
        let a = store
            .create_account(new_account("a", Role::Administrator))
            .await
            .unwrap();
        let b = store
            .create_account(new_account("b", Role::Administrator))
            .await
            .unwrap();

        let (ra, rb) = tokio::join!(
            store.update_account(a.id, AccountChanges::deactivate()),
            store.update_account(b.id, AccountChanges::deactivate()),
        );

        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        assert_eq!(store.count_active_admins(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revocation_list_capped() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..120 {
            store
                .revoke_token(account, &format!("t{i}"), now, 100)
                .await
                .unwrap();
        }
        let record = store.load(account).await.unwrap();
        assert_eq!(record.token_ids.len(), 100);
        assert_eq!(record.token_ids.front().map(String::as_str), Some("t20"));

        store.revoke_all(account, now).await.unwrap();
        let record = store.load(account).await.unwrap();
        assert!(record.token_ids.is_empty());
        assert_eq!(record.revoked_before, Some(now));
    }

    #[tokio::test]
    async fn test_failure_counter_decays() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let window = Duration::minutes(30);
        let start = Utc::now();

        for i in 0..3 {
            let state = store
                .record_failure(account, start + Duration::minutes(i), window)
                .await
                .unwrap();
            assert_eq!(state.count, i as u32 + 1);
        }

        let state = store
            .record_failure(account, start + Duration::minutes(40), window)
            .await
            .unwrap();
        assert_eq!(state.count, 1);

        store.clear(account).await.unwrap();
        assert!(store.get(account).await.unwrap().is_none());
    }
}
