//! Client secret hashing and key token generation.

use crate::error::{AclError, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use rand::Rng;
use subtle::ConstantTimeEq;

/// Hash a client secret into a PHC string
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AclError::Hashing(e.to_string()))
}

/// Check a secret against a PHC string produced by [`hash_secret`]
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| AclError::Hashing(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

/// Compare a secret stored in plain text without leaking timing
pub fn verify_plain_secret(secret: &str, stored: &str) -> bool {
    secret.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Generate a new bearer token for a key
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    BASE64.encode(bytes)
}

/// Truncated form of a token shown in listings
pub fn display_token(token: &str, visible: usize) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(visible);
    format!("...{}", chars[start..].iter().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_secret("s3cret").unwrap();
        assert_ne!(hash, "s3cret");
        assert!(verify_secret("s3cret", &hash).unwrap());
        assert!(!verify_secret("wrong", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_non_phc_strings() {
        assert!(verify_secret("s3cret", "not-a-hash").is_err());
    }

    #[test]
    fn test_verify_plain_secret() {
        assert!(verify_plain_secret("s3cret", "s3cret"));
        assert!(!verify_plain_secret("s3cre", "s3cret"));
        assert!(!verify_plain_secret("s3creT", "s3cret"));
        assert!(!verify_plain_secret("", "s3cret"));
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_display_token() {
        assert_eq!(display_token("abcdefghij", 5), "...fghij");
        assert_eq!(display_token("abc", 5), "...abc");
    }
}
