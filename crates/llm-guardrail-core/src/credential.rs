//! API key digests using HMAC-SHA256.
//!
//! Keys are never stored in plaintext. The config store is keyed by
//! `hex(HMAC-SHA256(pepper, key))`, so a leaked store does not leak usable
//! credentials.

use crate::error::GuardrailError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Visible prefix of every issued key.
pub const KEY_PREFIX: &str = "sk-guard-";

const MIN_KEY_LEN: usize = KEY_PREFIX.len() + 16;
const MAX_KEY_LEN: usize = 256;

/// Computes and verifies key digests with a deployment-wide pepper.
#[derive(Clone)]
pub struct KeyHasher {
    pepper: Vec<u8>,
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHasher").finish_non_exhaustive()
    }
}

impl KeyHasher {
    /// Create a hasher.
    ///
    /// # Arguments
    ///
    /// * `pepper` - Secret mixed into every digest; must not be empty
    pub fn new(pepper: &str) -> Result<Self, GuardrailError> {
        if pepper.is_empty() {
            return Err(GuardrailError::Config(
                "credential pepper must not be empty".to_string(),
            ));
        }
        Ok(Self {
            pepper: pepper.as_bytes().to_vec(),
        })
    }

    /// Hex-encoded digest of `key`.
    pub fn digest(&self, key: &str) -> Result<String, GuardrailError> {
        let mut mac = HmacSha256::new_from_slice(&self.pepper)
            .map_err(|e| GuardrailError::Config(format!("HMAC error: {e}")))?;
        mac.update(key.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of `key` against a stored digest.
    pub fn verify(&self, key: &str, digest: &str) -> bool {
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.pepper) else {
            return false;
        };
        mac.update(key.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Extract the key from an `Authorization: Bearer <key>` header value.
///
/// Rejects missing scheme, empty keys, keys without the issued prefix and
/// implausible lengths before any store lookup.
pub fn parse_bearer(header_value: Option<&str>) -> Result<&str, GuardrailError> {
    let value = header_value
        .ok_or_else(|| GuardrailError::Auth("missing Authorization header".to_string()))?;

    let key = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or_else(|| GuardrailError::Auth("expected a Bearer credential".to_string()))?;

    if key.is_empty() {
        return Err(GuardrailError::Auth("empty credential".to_string()));
    }
    if !key.starts_with(KEY_PREFIX) || key.len() < MIN_KEY_LEN || key.len() > MAX_KEY_LEN {
        return Err(GuardrailError::Auth("malformed API key".to_string()));
    }
    Ok(key)
}

/// Generate a fresh key for seeding stores.
pub fn generate_key() -> String {
    let a = uuid::Uuid::new_v4().simple().to_string();
    let b = uuid::Uuid::new_v4().simple().to_string();
    format!("{KEY_PREFIX}{a}{b}")
}
