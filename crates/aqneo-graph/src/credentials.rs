//! Sealed connection parameters handed to writer workers.
//!
//! Workers never share the parent's connection. Each one receives the same
//! immutable [`CredentialBundle`] and the [`EphemeralKey`] that opens it, and
//! builds its own connection from the result. The key is random per process
//! and the symmetric key is stretched from it with PBKDF2 over a random salt,
//! so two bundles of the same config never share ciphertext.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::client::GraphConfig;
use crate::error::SinkError;

const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Random secret used to derive the bundle key.
#[derive(Clone)]
pub struct EphemeralKey([u8; 32]);

impl EphemeralKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn derive(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.0, salt, ITERATIONS, &mut key);
        key
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralKey(..)")
    }
}

/// `base64(salt ‖ nonce ‖ ciphertext)` of a serialized [`GraphConfig`].
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    blob: String,
}

impl CredentialBundle {
    pub fn seal(config: &GraphConfig, key: &EphemeralKey) -> Result<Self, SinkError> {
        let plaintext =
            serde_json::to_vec(config).map_err(|e| SinkError::Credentials(e.to_string()))?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let derived = key.derive(&salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| SinkError::Credentials("failed to seal credentials".to_string()))?;

        let mut raw = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(Self {
            blob: STANDARD.encode(raw),
        })
    }

    pub fn open(&self, key: &EphemeralKey) -> Result<GraphConfig, SinkError> {
        let raw = STANDARD
            .decode(&self.blob)
            .map_err(|e| SinkError::Credentials(format!("malformed bundle: {e}")))?;
        if raw.len() <= SALT_LEN + NONCE_LEN {
            return Err(SinkError::Credentials("bundle is truncated".to_string()));
        }
        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let derived = key.derive(salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SinkError::Credentials("wrong key or tampered bundle".to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|e| SinkError::Credentials(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.blob
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialBundle({} bytes)", self.blob.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GraphConfig {
        GraphConfig {
            uri: "bolt://graph:7687".to_string(),
            user: "neo4j".to_string(),
            password: "s3cret".to_string(),
            ..GraphConfig::default()
        }
    }

    #[test]
    fn test_seal_and_open() {
        let key = EphemeralKey::generate();
        let bundle = CredentialBundle::seal(&config(), &key).unwrap();
        assert!(!bundle.as_str().contains("s3cret"));

        let opened = bundle.open(&key).unwrap();
        assert_eq!(opened.uri, "bolt://graph:7687");
        assert_eq!(opened.password, "s3cret");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let bundle = CredentialBundle::seal(&config(), &EphemeralKey::generate()).unwrap();
        let err = bundle.open(&EphemeralKey::generate()).unwrap_err();
        assert!(matches!(err, SinkError::Credentials(_)));
    }

    #[test]
    fn test_salt_is_fresh_per_seal() {
        let key = EphemeralKey::generate();
        let a = CredentialBundle::seal(&config(), &key).unwrap();
        let b = CredentialBundle::seal(&config(), &key).unwrap();
        assert_ne!(a, b);
    }
}
