/// Password hashing, verification, strength scoring and generation
///
/// Hashing uses Argon2id with a fresh random salt per call:
/// - Memory: 64 MB
/// - Iterations: 3
/// - Parallelism: 4 lanes
/// - Output: 32 bytes, stored as a PHC string
///
/// Hashing and verification are CPU-bound; async callers go through
/// [`hash_password_blocking`] and [`verify_password_blocking`], which run
/// on the blocking thread pool.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use cobros_core::AuthConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Password hashing and generation errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("At least one character class must be enabled")]
    NoCharacterClasses,
}

/// Password hashing configuration
///
/// These are also the minimum parameters a stored digest must carry; see
/// [`needs_rehash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl From<&AuthConfig> for PasswordConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            memory_cost: config.hash_memory_kib,
            time_cost: config.hash_time_cost,
            parallelism: config.hash_parallelism,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    /// Create Argon2 parameters from this configuration
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a plaintext password using Argon2id with the default parameters
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_config(password, &PasswordConfig::default())
}

/// Hash a password with custom configuration
///
/// Returns a PHC string (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`) that
/// embeds the salt and parameters, so no separate storage is needed.
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = config.to_params()?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored hash
///
/// The comparison is done by the Argon2 primitive (constant time); the
/// parameters are read from the digest itself.
///
/// * `Ok(true)` - Password matches
/// * `Ok(false)` - Password does not match
/// * `Err(PasswordError)` - The stored hash is not a valid PHC string
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// [`hash_password_with_config`] on the blocking thread pool
pub async fn hash_password_blocking(
    password: String,
    config: PasswordConfig,
) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
        .await
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?
}

/// [`verify_password`] on the blocking thread pool
pub async fn verify_password_blocking(
    password: String,
    hash: String,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| PasswordError::VerificationFailed(e.to_string()))?
}

/// Whether a stored digest should be replaced on the next successful login
///
/// True when the digest is not an Argon2id PHC string or any of its
/// embedded parameters is below the configured minimum.
pub fn needs_rehash(hash: &str, config: &PasswordConfig) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return true;
    };
    if parsed.algorithm != argon2::Algorithm::Argon2id.ident() {
        return true;
    }
    let Ok(params) = Params::try_from(&parsed) else {
        return true;
    };

    params.m_cost() < config.memory_cost
        || params.t_cost() < config.time_cost
        || params.p_cost() < config.parallelism
}

/// Minimum accepted length
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Score a password must reach to be accepted
pub const MIN_STRENGTH_SCORE: i32 = 3;

const WEAK_SUBSTRINGS: &[&str] = &[
    "password", "passw0rd", "123456", "qwerty", "abc123", "111111", "123123", "000000",
    "admin", "letmein", "welcome", "monkey", "dragon", "master", "login", "iloveyou",
    "sunshine", "princess", "football", "baseball", "trustno1", "superman", "contraseña",
];

const SEQUENCES: &[&str] = &[
    "abcdefghijklmnopqrstuvwxyz",
    "0123456789",
    "qwertyuiop",
    "asdfghjkl",
    "zxcvbnm",
];

/// Result of [`score_strength`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PasswordStrength {
    pub valid: bool,
    pub score: i32,
    /// Ordered, human-readable suggestions
    pub feedback: Vec<String>,
}

/// Score password strength
///
/// Rejects anything shorter than 6 characters. Otherwise one point per
/// length tier (8, 12, 16) and per character class present (lowercase,
/// uppercase, digit, special); two points off for a common weak substring,
/// one for three or more identical characters in a row and one for a
/// three-character alphabet, digit or keyboard run. Valid at 3 or more.
pub fn score_strength(password: &str) -> PasswordStrength {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return PasswordStrength {
            valid: false,
            score: 0,
            feedback: vec![format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
            )],
        };
    }

    let mut score = 0i32;
    let mut feedback = Vec::new();

    for tier in [8, 12, 16] {
        if length >= tier {
            score += 1;
        }
    }
    if length < 8 {
        feedback.push("Use at least 8 characters".to_string());
    }

    if password.chars().any(|c| c.is_lowercase()) {
        score += 1;
    } else {
        feedback.push("Add lowercase letters".to_string());
    }
    if password.chars().any(|c| c.is_uppercase()) {
        score += 1;
    } else {
        feedback.push("Add uppercase letters".to_string());
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    } else {
        feedback.push("Add numbers".to_string());
    }
    if password.chars().any(|c| !c.is_alphanumeric()) {
        score += 1;
    } else {
        feedback.push("Add special characters (!@#$%...)".to_string());
    }

    let lowered = password.to_lowercase();
    if let Some(weak) = WEAK_SUBSTRINGS.iter().find(|w| lowered.contains(*w)) {
        score -= 2;
        feedback.push(format!("Avoid common words and patterns such as '{weak}'"));
    }
    if has_repeated_run(&lowered) {
        score -= 1;
        feedback.push("Avoid repeating the same character 3 or more times".to_string());
    }
    if has_sequence(&lowered) {
        score -= 1;
        feedback.push("Avoid sequences such as 'abc', '123' or 'qwe'".to_string());
    }

    let score = score.max(0);
    let valid = score >= MIN_STRENGTH_SCORE;
    if !valid {
        feedback.push("Password is too weak".to_string());
    }

    PasswordStrength {
        valid,
        score,
        feedback,
    }
}

fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

fn has_sequence(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| {
        let run: String = w.iter().collect();
        let reversed: String = w.iter().rev().collect();
        SEQUENCES
            .iter()
            .any(|seq| seq.contains(&run) || seq.contains(&reversed))
    })
}

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+[]{};:,.?";

/// Generated passwords are never shorter than this
pub const MIN_GENERATED_LENGTH: usize = 8;

/// Character classes for [`generate_password`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordOptions {
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub special: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            uppercase: true,
            digits: true,
            special: true,
        }
    }
}

/// Generate a random password
///
/// Contains at least one character from every enabled class; the rest is
/// drawn uniformly from the union and the result is shuffled so the
/// guaranteed characters are not at predictable positions.
pub fn generate_password(length: usize, options: PasswordOptions) -> Result<String, PasswordError> {
    let classes: Vec<&[u8]> = [
        (options.lowercase, LOWERCASE),
        (options.uppercase, UPPERCASE),
        (options.digits, DIGITS),
        (options.special, SPECIAL),
    ]
    .into_iter()
    .filter_map(|(enabled, set)| enabled.then_some(set))
    .collect();

    if classes.is_empty() {
        return Err(PasswordError::NoCharacterClasses);
    }

    let length = length.max(MIN_GENERATED_LENGTH);
    let pool: Vec<u8> = classes.concat();
    let mut rng = rand::thread_rng();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < length {
        chars.push(pool[rng.gen_range(0..pool.len())]);
    }
    chars.shuffle(&mut rng);

    Ok(chars.into_iter().map(char::from).collect())
}

#[cfg(test)]
pub(crate) fn test_config() -> PasswordConfig {
    PasswordConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        output_len: Some(32),
    }
}
