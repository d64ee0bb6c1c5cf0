//! Credential verification over Argon2id.
//!
//! Verification is constant-time by construction: the presented password is
//! hashed with the stored salt and parameters, and the derived hashes are
//! compared by the primitive itself. The plaintext is never logged.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::AuthError;

/// Hash a plaintext password for storage.
///
/// # Errors
///
/// Returns `AuthError::Unavailable` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Unavailable(anyhow::anyhow!("password hashing failed: {err}")))
}

/// Verify a plaintext password against a stored hash.
///
/// A malformed stored hash and a wrong password both yield
/// `AuthError::InvalidCredentials` so nothing about the stored record leaks.
///
/// # Errors
///
/// Returns `AuthError::InvalidCredentials` when verification fails.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_accepts_correct_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).is_ok());
    }

    #[test]
    fn rejects_wrong_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        let err = verify_password("Tr0ub4dor&3", &hash).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn rejects_malformed_stored_hash() {
        let err = verify_password("anything", "not-a-phc-string").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same password").unwrap();
        let second = hash_password("same password").unwrap();
        assert_ne!(first, second);
    }
}
