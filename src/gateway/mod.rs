//! Chain Gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Tracker / Resubmitter / Submission Pipeline
//!     → ChainGateway (one logical network)
//!     → rpc.rs (JSON-RPC over HTTP, endpoints walked in NodeRegistry order)
//!     → NodeRegistry (passive health: success/latency or failure per call)
//! ```
//!
//! # Constraints
//! - Every call is bounded by the configured RPC timeout
//! - A timeout is a transient error, never a verdict on the transaction
//! - `reset_connections` drops pooled connections and endpoint failure state

pub mod mock;
pub mod rpc;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::custody::SignedPayload;

pub use mock::MockGateway;
pub use rpc::RpcGateway;
pub use types::{ChainTransaction, GatewayError, GatewayResult, Receipt};

/// Everything the core asks of the network.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn current_height(&self) -> GatewayResult<u64>;

    /// `None` when no endpoint knows the hash.
    async fn get_transaction(&self, hash: &str) -> GatewayResult<Option<ChainTransaction>>;

    /// `None` until the transaction is included in a block.
    async fn get_receipt(&self, hash: &str) -> GatewayResult<Option<Receipt>>;

    async fn is_in_mempool(&self, hash: &str) -> GatewayResult<bool>;

    /// Send a signed payload; returns the network hash.
    async fn broadcast(&self, payload: &SignedPayload) -> GatewayResult<String>;

    /// Round-trip latency of one endpoint.
    async fn probe_health(&self, endpoint: &Url) -> GatewayResult<Duration>;

    /// Drop every cached connection so subsequent calls re-establish them.
    async fn reset_connections(&self);
}
