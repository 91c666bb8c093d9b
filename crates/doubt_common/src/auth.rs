//! Password hashing and credential checks.
//!
//! Stored form: `sha256$<salt hex>$<digest hex>`, digest = SHA-256(salt || password).

use crate::store::StoreError;
use rand::RngCore;
use sha2::{Digest, Sha256};

const SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;
const MAX_USERNAME_LEN: usize = 64;

/// Checked in place of a real hash when the username is unknown
const UNKNOWN_USER_HASH: &str = concat!(
    "sha256$",
    "00000000000000000000000000000000",
    "$",
    "0000000000000000000000000000000000000000000000000000000000000000"
);

/// Account errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Username already exists. Please choose another.")]
    AlreadyExists,

    /// Unknown user and wrong password are reported the same way
    #[error("Invalid username or password.")]
    InvalidCredentials,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}${}", SCHEME, hex::encode(salt), digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut fields = stored.split('$');
    let (Some(SCHEME), Some(salt_hex), Some(expected), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    constant_time_eq(digest(&salt, password).as_bytes(), expected.as_bytes())
}

/// Verify a login attempt. A missing account still pays for one digest.
pub fn verify_account(password: &str, stored: Option<&str>) -> bool {
    let matched = verify_password(password, stored.unwrap_or(UNKNOWN_USER_HASH));
    matched && stored.is_some()
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check signup input, returning the trimmed username
pub fn validate_credentials<'a>(username: &'a str, password: &str) -> Result<&'a str, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::InvalidInput("Username must not be empty.".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Username must be at most {} characters.",
            MAX_USERNAME_LEN
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidInput(
            "Username must not contain spaces.".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("Password must not be empty.".to_string()));
    }
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_account() {
        let stored = hash_password("hunter2");
        assert!(verify_account("hunter2", Some(&stored)));
        assert!(!verify_account("hunter3", Some(&stored)));
        assert!(!verify_account("hunter2", None));
        assert!(!verify_account("", None));
    }

    #[test]
    fn test_unknown_user_hash_is_well_formed() {
        let fields: Vec<&str> = UNKNOWN_USER_HASH.split('$').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], SCHEME);
        assert_eq!(hex::decode(fields[1]).unwrap().len(), SALT_LEN);
        assert_eq!(fields[2].len(), digest(&[0u8; SALT_LEN], "x").len());
    }

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_password("hunter2");
        assert!(stored.starts_with("sha256$"));
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "pw"));
        assert!(!verify_password("pw", "md5$00$00"));
        assert!(!verify_password("pw", "sha256$zz$00"));
        assert!(!verify_password("pw", "sha256$00$00$extra"));
    }

    #[test]
    fn test_validate_credentials() {
        assert_eq!(validate_credentials("  asha ", "pw").unwrap(), "asha");
        assert!(matches!(
            validate_credentials("   ", "pw"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_credentials("two words", "pw"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_credentials("asha", ""),
            Err(AuthError::InvalidInput(_))
        ));
        let long = "x".repeat(65);
        assert!(validate_credentials(&long, "pw").is_err());
    }
}
