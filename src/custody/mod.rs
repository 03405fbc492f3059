//! Key Custodian subsystem.
//!
//! # Data Flow
//! ```text
//! Process secret (environment variable)
//!     → cipher.rs (SHA-256 derived AES-256-GCM master key)
//!     → custodian.rs (create identity: generate, seal, store once)
//!     → custodian.rs (sign: load, open, cache, sign)
//!     → wallet.rs (secp256k1 signer)
//! ```
//!
//! # Security Constraints
//! - Only encrypted key material reaches the wallet store
//! - The master secret is never persisted next to the data
//! - Never log private keys or decrypted bytes
//! - Custody failures are fatal to the attempt and never retried

pub mod cipher;
pub mod custodian;
pub mod types;
pub mod wallet;

pub use cipher::MasterKey;
pub use custodian::KeyCustodian;
pub use types::{CustodyError, Identity, SignedPayload, WalletRecord};
pub use wallet::Wallet;
