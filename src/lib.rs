//! Transaction reliability layer for oracle services.
//!
//! Takes write requests from calling services, signs them with a
//! per-service identity, broadcasts them and follows each one through
//! the network until it is confirmed, failed, expired or cancelled.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ manager ──▶ pipeline ──▶ custody (sign) ──▶ gateway (broadcast)
//!                │            │
//!                │            ▼
//!                │         txn::recorder ──▶ store (record + event)
//!                │            ▲                 │
//!                │            │                 ▼
//!                └──────▶ tracker ◀──── tracker::cache
//!                             │
//!                  ┌──────────┼─────────────┐
//!                  ▼          ▼             ▼
//!              resubmit    gateway     nodes::partition
//!                                           │
//!                                 nodes::monitor ──▶ nodes::registry
//! ```

// Core subsystems
pub mod custody;
pub mod gateway;
pub mod manager;
pub mod pipeline;
pub mod resubmit;
pub mod store;
pub mod tracker;
pub mod txn;

// Endpoint health
pub mod nodes;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ManagerConfig;
pub use gateway::{ChainGateway, MockGateway, RpcGateway};
pub use lifecycle::Shutdown;
pub use manager::TransactionManager;
pub use store::{MemoryStore, SqlStore};
pub use txn::{ManagerError, ManagerResult, Transaction, TransactionRequest, TxStatus};
