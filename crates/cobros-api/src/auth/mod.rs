//! Authentication and authorization module
//!
//! - Password hashing, strength scoring and generation (Argon2id)
//! - Token issuance, verification and revocation (JWT, HS256)
//! - Authentication service: login with lockout, password change and reset
//! - Account administration with last-administrator protection
//! - Middleware for request authentication and role/permission/owner gates

pub mod accounts;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;

pub use accounts::{AccountService, CreateAccount};
pub use jwt::{Claims, TokenConfig, TokenError, TokenPurpose, TokenService};
pub use middleware::{
    auth_middleware, check_owner, check_permission, check_role, require_owner,
    require_permission, require_role, AccountPathOwner, AuthenticatedUser, OwnerResolver,
};
pub use password::{
    generate_password, hash_password, hash_password_with_config, needs_rehash, score_strength,
    verify_password, PasswordConfig, PasswordError, PasswordOptions, PasswordStrength,
};
pub use service::{AuthError, AuthService, LoginPolicy, LoginResponse, ResetToken};
