//! Secret vault port

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the secret vault
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault unavailable: {0}")]
    Unavailable(String),

    #[error("vault write of '{name}' failed: {reason}")]
    Write { name: String, reason: String },

    #[error("vault read of '{name}' failed: {reason}")]
    Read { name: String, reason: String },
}

/// Durable key/value map of encoded secrets
///
/// No transactional guarantees across keys.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Raw bytes of a secret, `None` when absent
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, VaultError>;

    /// Create or replace a secret
    async fn set(&self, name: &str, value: &[u8]) -> Result<(), VaultError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Names of the secrets a rotation reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretNames {
    /// Merged key set, base64 of the JWKS JSON
    pub jwks: String,
    /// Keystore, base64 of the keystore bytes
    pub keystore: String,
    /// Keystore password, plain
    pub keystore_password: String,
    /// Rotation time, decimal epoch seconds
    pub rotated_at: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            jwks: "oxauth_openid_key_base64".to_string(),
            keystore: "oxauth_jks_base64".to_string(),
            keystore_password: "oxauth_openid_jks_pass".to_string(),
            rotated_at: "oxauth_key_rotated_at".to_string(),
        }
    }
}

pub fn encode_base64(bytes: &[u8]) -> Vec<u8> {
    STANDARD.encode(bytes).into_bytes()
}

/// Decode a base64 secret, tolerating surrounding whitespace
pub fn decode_base64(encoded: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.trim_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_tolerates_trailing_newline() {
        let encoded = encode_base64(b"{\"keys\":[]}");
        let mut with_newline = encoded.clone();
        with_newline.push(b'\n');

        assert_eq!(decode_base64(&with_newline).unwrap(), b"{\"keys\":[]}");
        assert!(decode_base64(b"not base64!").is_err());
    }

    #[test]
    fn test_default_secret_names() {
        let names = SecretNames::default();
        assert_eq!(names.jwks, "oxauth_openid_key_base64");
        assert_eq!(names.keystore, "oxauth_jks_base64");
    }
}
