//! Custody records and error definitions.

use alloy::primitives::{keccak256, Address};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during key custody operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// No wallet exists for the service.
    #[error("no signing identity for service {0}")]
    IdentityNotFound(String),

    /// The wallet was revoked by an operator.
    #[error("signing identity for service {0} has been revoked")]
    IdentityRevoked(String),

    /// Corrupted record or wrong master key.
    #[error("failed to decrypt signing key: {0}")]
    DecryptionFailed(String),

    /// Master secret unavailable or unusable.
    #[error("master key error: {0}")]
    MasterKey(String),

    /// The signer itself failed.
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("wallet store error: {0}")]
    Store(#[from] StoreError),
}

/// Persisted signing identity. Holds only encrypted key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub service: String,
    pub address: Address,
    /// SEC1 compressed public key, hex.
    pub public_key: String,
    /// `nonce || ciphertext+tag`, hex.
    pub encrypted_key: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl WalletRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            service: self.service.clone(),
            address: self.address,
            public_key: self.public_key.clone(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Public half of a signing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub service: String,
    pub address: Address,
    pub public_key: String,
}

/// A message with its signature, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub signer: Address,
    pub message: Vec<u8>,
    /// 65-byte `r || s || v` signature over `keccak256(message)`.
    pub signature: Vec<u8>,
}

impl SignedPayload {
    /// Wire encoding sent to the network: hex of the JSON envelope.
    pub fn to_wire(&self) -> String {
        // Serializing plain byte vectors and an address cannot fail.
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Content hash of the wire encoding, `0x`-prefixed.
    pub fn wire_hash(&self) -> String {
        format!("{:#x}", keccak256(self.to_wire().as_bytes()))
    }
}
