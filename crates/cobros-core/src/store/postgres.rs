//! PostgreSQL store
//!
//! Dedicated tables back each collaborator (see `migrations/`). Mutations
//! that can remove an active administrator take a transaction-scoped
//! advisory lock before counting, so two concurrent deactivations cannot
//! both pass the check.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{
    AuditStore, CredentialStore, LoginAttemptStore, RevocationStore, StoreError, StoreResult,
};
use crate::models::{
    Account, AccountChanges, AuditRecord, FailedLogins, NewAccount, RevocationRecord, Role,
};

/// Schema applied by [`PgStore::migrate`]
pub const SCHEMA: &str = include_str!("../../migrations/0001_auth_schema.sql");

/// Advisory lock key serialising administrator-quorum mutations
const ADMIN_QUORUM_LOCK: i64 = 0x636f_6272_6f73_0001;

const ACCOUNT_COLUMNS: &str = "id, handle, email, password_hash, display_name, role, is_active, \
                               last_activity_at, created_at, updated_at";

/// PostgreSQL-backed implementation of all store traits
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store connection
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the auth schema (idempotent)
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Ping the database
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn lock_admin_quorum(tx: &mut Transaction<'_, Postgres>) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ADMIN_QUORUM_LOCK)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn other_active_admins(
        tx: &mut Transaction<'_, Postgres>,
        excluding: Uuid,
    ) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts WHERE role = 'Administrator' AND is_active AND id <> $1",
        )
        .bind(excluding)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }
}

/// Account row from database
#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    handle: String,
    email: String,
    password_hash: String,
    display_name: String,
    role: String,
    is_active: bool,
    last_activity_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| StoreError::Database(format!("unknown role in row: {}", row.role)))?;
        Ok(Account {
            id: row.id,
            handle: row.handle,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            role,
            is_active: row.is_active,
            last_activity_at: row.last_activity_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_handle_or_email(&self, identifier: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE handle = $1 OR email = $1 \
             ORDER BY (handle = $1) DESC LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (id, handle, email, password_hash, display_name, role, is_active, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&account.handle)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.display_name)
        .bind(account.role.as_str())
        .bind(account.is_active)
        .fetch_one(&self.pool)
        .await?;
        Account::try_from(row)
    }

    async fn count_active_admins(&self, excluding: Option<Uuid>) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts WHERE role = 'Administrator' AND is_active \
             AND ($1::uuid IS NULL OR id <> $1)",
        )
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;
        Self::lock_admin_quorum(&mut tx).await?;

        let current = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        let current = Account::try_from(current)?;

        if changes.removes_admin(&current) && Self::other_active_admins(&mut tx, id).await? == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::LastAdminProtected);
        }

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET \
                display_name = COALESCE($2, display_name), \
                email = COALESCE($3, email), \
                role = COALESCE($4, role), \
                is_active = COALESCE($5, is_active), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(changes.display_name.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.role.map(|r| r.as_str()))
        .bind(changes.is_active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Account::try_from(row)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_activity(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE accounts SET last_activity_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_admin_quorum(&mut tx).await?;

        let current = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        let current = Account::try_from(current)?;

        if current.is_active_admin() && Self::other_active_admins(&mut tx, id).await? == 0 {
            return Err(StoreError::LastAdminProtected);
        }

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for PgStore {
    async fn revoke_token(
        &self,
        account_id: Uuid,
        token_id: &str,
        at: DateTime<Utc>,
        cap: usize,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO revoked_tokens (account_id, token_id, revoked_at) VALUES ($1, $2, $3) \
             ON CONFLICT (account_id, token_id) DO NOTHING",
        )
        .bind(account_id)
        .bind(token_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        // Keep the newest `cap` ids by insertion order
        sqlx::query(
            "DELETE FROM revoked_tokens WHERE account_id = $1 AND seq NOT IN ( \
                SELECT seq FROM revoked_tokens WHERE account_id = $1 ORDER BY seq DESC LIMIT $2)",
        )
        .bind(account_id)
        .bind(cap as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_all(&self, account_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM revoked_tokens WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO token_revocation_cutoffs (account_id, revoked_before) VALUES ($1, $2) \
             ON CONFLICT (account_id) DO UPDATE SET revoked_before = EXCLUDED.revoked_before",
        )
        .bind(account_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, account_id: Uuid) -> StoreResult<RevocationRecord> {
        let token_ids = sqlx::query_scalar::<_, String>(
            "SELECT token_id FROM revoked_tokens WHERE account_id = $1 ORDER BY seq",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let revoked_before = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT revoked_before FROM token_revocation_cutoffs WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(RevocationRecord {
            token_ids: token_ids.into(),
            revoked_before,
        })
    }
}

#[async_trait]
impl LoginAttemptStore for PgStore {
    async fn get(&self, account_id: Uuid) -> StoreResult<Option<FailedLogins>> {
        let row = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
            "SELECT failure_count, last_failure_at FROM login_failures WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count, last_failure_at)| FailedLogins {
            count: count.max(0) as u32,
            last_failure_at,
        }))
    }

    async fn record_failure(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<FailedLogins> {
        // Single upsert: the decay is applied inside the statement so the
        // read-then-write happens under the row lock.
        let (count, last_failure_at) = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
            "INSERT INTO login_failures (account_id, failure_count, last_failure_at) \
             VALUES ($1, 1, $2) \
             ON CONFLICT (account_id) DO UPDATE SET \
                failure_count = CASE \
                    WHEN $2 - login_failures.last_failure_at > make_interval(secs => $3) THEN 1 \
                    ELSE login_failures.failure_count + 1 \
                END, \
                last_failure_at = $2 \
             RETURNING failure_count, last_failure_at",
        )
        .bind(account_id)
        .bind(at)
        .bind(window.num_seconds() as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok(FailedLogins {
            count: count.max(0) as u32,
            last_failure_at,
        })
    }

    async fn clear(&self, account_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM login_failures WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, record: &AuditRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, event_type, account_id, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(&record.event_type)
        .bind(record.account_id)
        .bind(&record.payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn new_account(role: Role) -> NewAccount {
        let suffix = Uuid::new_v4().simple().to_string();
        NewAccount {
            handle: format!("h{suffix}"),
            email: format!("{suffix}@example.com"),
            password_hash: "hash".to_string(),
            display_name: "Test".to_string(),
            role,
            is_active: true,
        }
    }

    #[test]
    fn test_schema_declares_all_tables() {
        for table in [
            "accounts",
            "revoked_tokens",
            "token_revocation_cutoffs",
            "login_failures",
            "audit_log",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "{table}"
            );
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_account_roundtrip_and_conflict() {
        let store = test_store().await;
        let new = new_account(Role::User);
        let created = store.create_account(new.clone()).await.unwrap();

        let found = store
            .find_by_handle_or_email(&new.email)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.role, Role::User);

        let err = store.create_account(new).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.delete_account(created.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_revocation_cap_and_cutoff() {
        let store = test_store().await;
        let account = store.create_account(new_account(Role::User)).await.unwrap();
        let now = Utc::now();

        for i in 0..5 {
            store
                .revoke_token(account.id, &format!("t{i}"), now, 3)
                .await
                .unwrap();
        }
        let record = store.load(account.id).await.unwrap();
        assert_eq!(
            record.token_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["t2", "t3", "t4"]
        );

        store.revoke_all(account.id, now).await.unwrap();
        let record = store.load(account.id).await.unwrap();
        assert!(record.token_ids.is_empty());
        assert!(record.revoked_before.is_some());

        store.delete_account(account.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_failure_upsert_applies_decay() {
        let store = test_store().await;
        let account = store.create_account(new_account(Role::User)).await.unwrap();
        let window = Duration::minutes(30);
        let start = Utc::now();

        store.record_failure(account.id, start, window).await.unwrap();
        let second = store
            .record_failure(account.id, start + Duration::minutes(1), window)
            .await
            .unwrap();
        assert_eq!(second.count, 2);

        let decayed = store
            .record_failure(account.id, start + Duration::minutes(45), window)
            .await
            .unwrap();
        assert_eq!(decayed.count, 1);

        store.delete_account(account.id).await.unwrap();
    }
}
