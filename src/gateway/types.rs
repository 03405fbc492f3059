//! Chain-facing types and error definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Execution outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Blocks on top of (and including) the inclusion block. Zero while
    /// the receipt is known but the block is not yet counted.
    pub confirmations: u64,
    pub block_height: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub gas_consumed: u64,
    /// Opaque result payload (e.g. the VM stack).
    pub result: serde_json::Value,
    /// Set when execution faulted.
    pub fault: Option<String>,
}

impl Receipt {
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// What the network knows about a transaction hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub hash: String,
    /// `None` while not yet in a block.
    pub block_height: Option<u64>,
    pub confirmations: u64,
}

/// Errors that can occur talking to the network.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connection refused, reset, DNS, TLS...
    #[error("transport error at {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The network refused the transaction outright.
    #[error("broadcast rejected: {0}")]
    Rejected(String),

    /// Node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Node answered with something we could not read.
    #[error("malformed response: {0}")]
    Decode(String),

    #[error("no endpoints configured")]
    NoEndpoints,

    /// Every endpoint was tried and none answered.
    #[error("all endpoints failed: {0}")]
    Exhausted(String),
}

impl GatewayError {
    /// Whether the error is retry fodder rather than a verdict on the
    /// transaction itself.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
