use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::error::AuthError;

fn hash_blocking(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AuthError::Hashing(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// bcrypt hashes carried over from older user documents.
pub fn is_legacy_hash(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|p| hash.starts_with(p))
}

fn verify_blocking(plain: &str, hash: &str) -> bool {
    if is_legacy_hash(hash) {
        return match bcrypt::verify(plain, hash) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "stored bcrypt hash is unparseable");
                false
            }
        };
    }
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "stored password hash is unparseable");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id with a fresh OS-random salt, run off the async executor.
pub async fn hash_password(plain: &str) -> Result<String, AuthError> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || hash_blocking(&plain))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// Accepts Argon2 PHC strings and legacy bcrypt hashes. A malformed stored
/// hash is treated as a mismatch.
pub async fn verify_password(plain: &str, hash: &str) -> bool {
    let plain = plain.to_owned();
    let hash = hash.to_owned();
    match tokio::task::spawn_blocking(move || verify_blocking(&plain, &hash)).await {
        Ok(ok) => ok,
        Err(e) => {
            error!(error = %e, "password verification task failed");
            false
        }
    }
}
