//! Argon2id password hashing
//!
//! Parameters: 3 passes, 64 MiB memory, parallelism 4, 32-byte output.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::Lazy;

use crate::error::CryptoError;

static HASHER: Lazy<Argon2<'static>> = Lazy::new(|| {
    let params =
        Params::new(64 * 1024, 3, 4, Some(32)).expect("argon2 parameters are statically valid");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
});

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    HASHER
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// Verify a password against a PHC string. Comparison inside argon2 is
/// constant-time.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    HASHER.verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Burn the same work as a real verification when the user does not exist,
/// so login timing does not reveal which usernames are registered.
pub fn dummy_verify(password: &str) {
    static DUMMY_HASH: Lazy<String> =
        Lazy::new(|| hash_password("mcpbox-dummy-password").expect("dummy hash"));
    let _ = verify_password(password, &DUMMY_HASH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
