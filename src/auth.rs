//! Password hashing and signed auth tokens.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::player::PlayerId;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid password salt: {0}")]
    Salt(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// A fresh salt for a new world, in the PHC base64 form argon2 expects.
pub fn generate_salt() -> String {
    SaltString::generate(&mut OsRng).as_str().to_string()
}

/// Hash with the world's salt. The result is a self-describing PHC string.
pub fn hash_password(password: &str, salt: &str) -> Result<String, AuthError> {
    let salt = SaltString::from_b64(salt).map_err(|e| AuthError::Salt(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Registration input checks. Returns a client-facing reason on failure.
pub fn validate_registration(username: &str, password: &str, confirm: &str) -> Result<(), String> {
    if password != confirm {
        return Err("Passwords do not match".to_string());
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(format!("Username must be at least {} characters", MIN_USERNAME_LEN));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("Password must be at least {} characters", MIN_PASSWORD_LEN));
    }
    Ok(())
}

// ============================================================================
// Signed auth tokens
// ============================================================================

/// Issues and checks `player_id.nonce.signature` tokens.
///
/// The secret is generated at startup, so tokens do not survive a restart.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    pub fn with_secret(secret: &[u8]) -> Self {
        Self { secret: secret.to_vec() }
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC can take key of any size"),
        };
        mac.update(payload.as_bytes());
        mac
    }

    pub fn issue(&self, player_id: PlayerId) -> String {
        let payload = format!("{}.{}", player_id, Uuid::new_v4().simple());
        let signature = self.mac(&payload).finalize().into_bytes();
        format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(signature))
    }

    /// The player id a token was issued for, if the signature checks out.
    pub fn verify(&self, token: &str) -> Option<PlayerId> {
        let (payload, signature) = token.rsplit_once('.')?;
        let (player_id, _nonce) = payload.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        if self.mac(payload).verify_slice(&signature).is_err() {
            tracing::warn!("Auth token signature invalid");
            return None;
        }
        player_id.parse().ok()
    }
}

impl Default for TokenSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let salt = generate_salt();
        let hash = hash_password("hunter22", &salt).unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not a phc string"));
        // same salt, same password, same hash
        assert_eq!(hash, hash_password("hunter22", &salt).unwrap());
    }

    #[test]
    fn test_bad_salt_is_an_error() {
        assert!(matches!(hash_password("hunter22", "!"), Err(AuthError::Salt(_))));
    }

    #[test]
    fn test_registration_rules() {
        assert!(validate_registration("ant", "secret", "secret").is_ok());
        assert!(validate_registration("an", "secret", "secret").is_err());
        assert!(validate_registration("ant", "short", "short").is_err());
        assert!(validate_registration("ant", "secret", "secrets").is_err());
    }

    #[test]
    fn test_tokens() {
        let signer = TokenSigner::with_secret(b"test secret");
        let token = signer.issue(42);
        assert_eq!(signer.verify(&token), Some(42));
        assert_ne!(token, signer.issue(42));

        let other = TokenSigner::with_secret(b"other secret");
        assert_eq!(other.verify(&token), None);

        let tampered = token.replacen("42", "43", 1);
        assert_eq!(signer.verify(&tampered), None);
        assert_eq!(signer.verify("garbage"), None);
    }
}
