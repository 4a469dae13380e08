//! JWT token issuance, verification and revocation
//!
//! Tokens are HMAC-SHA256 signed and self-contained. Revocation is layered
//! on top through the [`RevocationStore`]: a per-account list of revoked
//! token ids plus a revoke-all cutoff. `verify` consults both synchronously
//! and fails with [`TokenError::Revoked`] on a hit.

use chrono::{DateTime, Duration, Utc};
use cobros_core::{Account, AuthConfig, Clock, RevocationStore, Role, StoreError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - account ID
    pub sub: String,
    /// JWT ID - unique token identifier for revocation
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    /// Issued at in milliseconds, compared against revoke-all cutoffs
    pub iat_ms: i64,
    /// Subject handle
    pub handle: String,
    /// Subject role name
    pub role: String,
    /// Absent on session tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl Claims {
    pub fn subject(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Malformed)
    }

    pub fn role(&self) -> Result<Role, TokenError> {
        Role::parse(&self.role).ok_or(TokenError::Malformed)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.iat_ms)
            .or_else(|| DateTime::<Utc>::from_timestamp(self.iat, 0))
            .unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    /// Whether the token was issued for `purpose`; untagged tokens are
    /// session tokens.
    pub fn has_purpose(&self, purpose: TokenPurpose) -> bool {
        self.purpose.as_deref().unwrap_or(TokenPurpose::Session.as_str()) == purpose.as_str()
    }
}

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Session,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Session => "session",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

/// Token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token format")]
    Malformed,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Failed to encode JWT: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("Revocation store error: {0}")]
    Store(#[from] StoreError),
}

/// Token lifetimes and signing settings
#[derive(Clone)]
pub struct TokenConfig {
    /// HMAC secret (must be non-empty)
    pub secret: String,
    pub issuer: String,
    pub session_ttl: Duration,
    pub reset_ttl: Duration,
    /// Revoked ids kept per account
    pub revocation_cap: usize,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("session_ttl", &self.session_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .field("revocation_cap", &self.revocation_cap)
            .finish()
    }
}

impl From<&AuthConfig> for TokenConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.issuer.clone(),
            session_ttl: Duration::seconds(config.session_ttl_secs as i64),
            reset_ttl: Duration::seconds(config.reset_ttl_secs as i64),
            revocation_cap: config.revocation_list_cap,
        }
    }
}

/// Issues, verifies and revokes bearer tokens
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revocations: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        config: TokenConfig,
        revocations: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
            revocations,
            clock,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Sign a new token for the subject
    pub fn issue(
        &self,
        subject_id: Uuid,
        handle: &str,
        role: Role,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: subject_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iat_ms: now.timestamp_millis(),
            handle: handle.to_string(),
            role: role.as_str().to_string(),
            purpose: match purpose {
                TokenPurpose::Session => None,
                other => Some(other.as_str().to_string()),
            },
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Session token with the configured lifetime (8 hours by default)
    pub fn issue_session(&self, account: &Account) -> Result<String, TokenError> {
        self.issue(
            account.id,
            &account.handle,
            account.role,
            TokenPurpose::Session,
            self.config.session_ttl,
        )
    }

    /// Password-reset token with the configured lifetime (15 minutes by default)
    pub fn issue_password_reset(&self, account: &Account) -> Result<String, TokenError> {
        self.issue(
            account.id,
            &account.handle,
            account.role,
            TokenPurpose::PasswordReset,
            self.config.reset_ttl,
        )
    }

    /// Verify signature, issuer, expiry and revocation state
    ///
    /// Expiry is checked against the injected clock, so the library's own
    /// `exp` validation is turned off.
    pub async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::Malformed)?
            .claims;
        claims.subject()?;

        if self.clock.now().timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        if self.is_revoked(&claims).await? {
            return Err(TokenError::Revoked);
        }

        Ok(claims)
    }

    /// Decode claims without checking signature or expiry
    ///
    /// Only for revocation: a token must stay revocable after it expired.
    /// Never trust the result for authentication.
    pub fn decode_unverified(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Malformed)
    }

    /// Whether the subject's revocation record covers these claims
    pub async fn is_revoked(&self, claims: &Claims) -> Result<bool, TokenError> {
        let record = self.revocations.load(claims.subject()?).await?;
        Ok(record.is_revoked(&claims.jti, claims.issued_at()))
    }

    /// Add the token's id to its subject's denylist
    ///
    /// Returns `false` when the id was already listed.
    pub async fn revoke(&self, token: &str) -> Result<bool, TokenError> {
        let claims = self.decode_unverified(token)?;
        let subject = claims.subject()?;

        let record = self.revocations.load(subject).await?;
        if record.token_ids.iter().any(|id| *id == claims.jti) {
            return Ok(false);
        }

        self.revocations
            .revoke_token(
                subject,
                &claims.jti,
                self.clock.now(),
                self.config.revocation_cap,
            )
            .await?;
        tracing::debug!(account_id = %subject, jti = %claims.jti, "Token revoked");
        Ok(true)
    }

    /// Revoke every token issued to `subject_id` up to now
    pub async fn revoke_all(&self, subject_id: Uuid) -> Result<(), TokenError> {
        self.revocations
            .revoke_all(subject_id, self.clock.now())
            .await?;
        tracing::debug!(account_id = %subject_id, "All tokens revoked");
        Ok(())
    }
}
