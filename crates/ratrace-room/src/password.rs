//! Room password hashing with Argon2.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::{ConfigViolation, RoomError};

/// Hashes a room password into a PHC string.
///
/// # Errors
/// Returns [`RoomError::InvalidConfig`] if Argon2 refuses the input.
pub fn hash_password(password: &str) -> Result<String, RoomError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::debug!(error = %e, "room password hashing failed");
            RoomError::InvalidConfig(vec![ConfigViolation::PasswordUnusable])
        })
}

/// Checks `password` against a stored PHC string. A malformed hash never
/// verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored room password hash is malformed");
            false
        }
    }
}
