//! Encryption-at-rest for signing keys.
//!
//! # Format
//! ```text
//! hex( nonce (12) || AES-256-GCM ciphertext + tag )
//! ```
//! The service name is bound as associated data, so a record copied under
//! another service fails authentication.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::custody::types::CustodyError;

const NONCE_LEN: usize = 12;
const KEY_DOMAIN: &[u8] = b"tx-manager/custody/master-key/v1";

/// Process-wide key-encryption key, derived from a secret that is never
/// stored next to the data it protects.
pub struct MasterKey(Zeroizing<[u8; 32]>);

impl MasterKey {
    /// Derive the key from raw secret bytes.
    pub fn derive(secret: &[u8]) -> Result<Self, CustodyError> {
        if secret.is_empty() {
            return Err(CustodyError::MasterKey("master secret is empty".into()));
        }
        let digest = Sha256::new()
            .chain_update(KEY_DOMAIN)
            .chain_update(secret)
            .finalize();
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);
        Ok(Self(key))
    }

    /// Derive the key from the secret held in an environment variable.
    pub fn from_env(var: &str) -> Result<Self, CustodyError> {
        let secret = Zeroizing::new(std::env::var(var).map_err(|_| {
            CustodyError::MasterKey(format!("environment variable {} not set", var))
        })?);
        Self::derive(secret.as_bytes())
    }

    fn cipher(&self) -> Result<Aes256Gcm, CustodyError> {
        Aes256Gcm::new_from_slice(self.0.as_slice())
            .map_err(|e| CustodyError::MasterKey(format!("invalid key length: {}", e)))
    }

    /// Encrypt `plaintext`, binding `aad`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, CustodyError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CustodyError::MasterKey(format!("encryption failed: {}", e)))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a value produced by [`MasterKey::seal`] with the same `aad`.
    pub fn open(&self, sealed: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        let data = hex::decode(sealed)
            .map_err(|e| CustodyError::DecryptionFailed(format!("hex decode failed: {}", e)))?;
        if data.len() <= NONCE_LEN {
            return Err(CustodyError::DecryptionFailed("ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| {
                CustodyError::DecryptionFailed("authentication failed (wrong master key or corrupted record)".into())
            })?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
