//! Decrypted signing wallet.
//!
//! # Security
//! - Only ever built from decrypted bytes inside the custodian
//! - Keys are never logged or serialized
//! - Raw key bytes handed out only in zeroizing buffers, for re-encryption

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use zeroize::Zeroizing;

use crate::custody::types::{CustodyError, SignedPayload};

/// A secp256k1 signer for one service identity.
#[derive(Clone)]
pub struct Wallet {
    signer: PrivateKeySigner,
}

impl Wallet {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Rebuild a wallet from raw 32-byte key material.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CustodyError> {
        let signer = PrivateKeySigner::from_slice(bytes)
            .map_err(|e| CustodyError::DecryptionFailed(format!("invalid key material: {}", e)))?;
        Ok(Self { signer })
    }

    /// Raw key bytes, for sealing under the master key.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signer.to_bytes().to_vec())
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// SEC1 compressed public key, hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signer.credential().verifying_key().to_sec1_bytes())
    }

    /// Sign `keccak256(message)`.
    ///
    /// RFC 6979 nonces make this deterministic: the same message always
    /// yields the same signature.
    pub fn sign(&self, message: &[u8]) -> Result<SignedPayload, CustodyError> {
        let digest = keccak256(message);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| CustodyError::Signing(e.to_string()))?;

        Ok(SignedPayload {
            signer: self.address(),
            message: message.to_vec(),
            signature: signature.as_bytes().to_vec(),
        })
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish()
    }
}
