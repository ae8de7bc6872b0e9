//! One-way hashing and verification for passwords and bearer tokens.
//!
//! Passwords are user-chosen, so they go through salted Argon2id. Tokens are
//! high-entropy random values; they use deterministic SHA-256 so a token can be
//! looked up by its hash.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

/// Random bytes in every generated token (hex encoded, so 64 characters).
pub const TOKEN_RANDOM_BYTES: usize = 32;

/// Hashes a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))?;

    Ok(password_hash.to_string())
}

/// Verifies a password against a stored Argon2 hash.
///
/// A mismatch is `Ok(false)`; only a malformed stored hash is an error.
pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(AppError::Internal(format!(
            "Password verification failed: {err}"
        ))),
    }
}

/// Hash a token using SHA-256.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a presented token against a stored hash in constant time.
pub fn verify_token_hash(token: &str, expected_hash: &str) -> bool {
    let actual = hash_token(token);
    actual.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

/// A freshly generated token. `raw` is surfaced to the caller exactly once.
pub struct GeneratedToken {
    pub raw: SecretString,
    pub hash: String,
}

impl std::fmt::Debug for GeneratedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedToken")
            .field("raw", &"[REDACTED]")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Generate a random hex string of `TOKEN_RANDOM_BYTES` bytes.
pub fn random_hex() -> String {
    let random_bytes: [u8; TOKEN_RANDOM_BYTES] = rand::random();
    hex::encode(random_bytes)
}

/// Generate a token from already composed raw text.
pub fn seal_token(raw: String) -> GeneratedToken {
    let hash = hash_token(&raw);
    GeneratedToken {
        raw: SecretString::from(raw),
        hash,
    }
}

/// Generate a random token and its hash.
pub fn generate_token() -> GeneratedToken {
    seal_token(random_hex())
}

/// Generate a `<prefix>_<random>` token and its hash.
pub fn generate_prefixed_token(prefix: &str) -> GeneratedToken {
    seal_token(format!("{}_{}", prefix, random_hex()))
}

/// Whether `s` looks like the random part of a generated token.
pub fn is_random_part(s: &str) -> bool {
    s.len() == TOKEN_RANDOM_BYTES * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
