//! Application state management

use crate::audit::{AuditDispatcher, AuditSink, StoreSink, TracingSink};
use crate::auth::{
    AccountService, AuthService, LoginPolicy, PasswordConfig, TokenConfig, TokenService,
};
use crate::middleware::AuthMetrics;
use cobros_core::{
    AppConfig, AuditStore, Clock, CredentialStore, LoginAttemptStore, MemoryStore, PgStore,
    RevocationStore, SystemClock,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Store implementations the services run on
#[derive(Clone)]
pub struct Backends {
    pub credentials: Arc<dyn CredentialStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub attempts: Arc<dyn LoginAttemptStore>,
    pub audit: Arc<dyn AuditStore>,
    /// Present when running on PostgreSQL; used by readiness and metrics
    pub postgres: Option<PgStore>,
}

impl Backends {
    pub fn postgres(store: PgStore) -> Self {
        let shared = Arc::new(store.clone());
        Self {
            credentials: shared.clone(),
            revocations: shared.clone(),
            attempts: shared.clone(),
            audit: shared,
            postgres: Some(store),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        let shared = Arc::new(store);
        Self {
            credentials: shared.clone(),
            revocations: shared.clone(),
            attempts: shared.clone(),
            audit: shared,
            postgres: None,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    pub accounts: Arc<AccountService>,
    pub tokens: Arc<TokenService>,
    pub audit: AuditDispatcher,
    pub metrics: AuthMetrics,
    pub postgres: Option<PgStore>,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
}

impl AppState {
    /// Wire the services over `backends`. Must be called inside a Tokio
    /// runtime (the audit worker is spawned here).
    pub fn new(config: AppConfig, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let password_config = PasswordConfig::from(&config.auth);
        Self::with_password_config(config, backends, clock, password_config)
    }

    /// Like [`AppState::new`] with explicit hashing parameters
    pub fn with_password_config(
        config: AppConfig,
        backends: Backends,
        clock: Arc<dyn Clock>,
        password_config: PasswordConfig,
    ) -> Self {
        let sinks: Vec<Arc<dyn AuditSink>> = vec![
            Arc::new(TracingSink),
            Arc::new(StoreSink::new(backends.audit.clone())),
        ];
        let (audit, _worker) = AuditDispatcher::spawn(sinks, clock.clone());

        let tokens = Arc::new(TokenService::new(
            TokenConfig::from(&config.auth),
            backends.revocations.clone(),
            clock.clone(),
        ));

        let auth = AuthService::new(
            backends.credentials.clone(),
            backends.attempts.clone(),
            tokens.clone(),
            audit.clone(),
            clock,
        )
        .with_policy(LoginPolicy::from(&config.auth))
        .with_password_config(password_config.clone());

        let accounts = AccountService::new(backends.credentials.clone(), tokens.clone(), audit.clone())
            .with_password_config(password_config);

        Self {
            config,
            auth: Arc::new(auth),
            accounts: Arc::new(accounts),
            tokens,
            audit,
            metrics: AuthMetrics::default(),
            postgres: backends.postgres,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
        }
    }

    /// PostgreSQL-backed state with the system clock
    pub fn with_postgres(config: AppConfig, store: PgStore) -> Self {
        Self::new(config, Backends::postgres(store), Arc::new(SystemClock))
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}
