//! Transaction Record Store.
//!
//! # Data Flow
//! ```text
//! StateRecorder
//!     → TransactionStore::insert / apply_transition (record + event, one unit)
//!     → sql.rs (SQLite; row update and event insert in one DB transaction)
//!     → memory.rs (lock-guarded tables, volatile, for tests)
//!
//! Tracker reload
//!     → TransactionStore::list_open (every non-terminal record)
//!
//! KeyCustodian
//!     → WalletStore (encrypted key material only)
//! ```
//!
//! # Layout
//! - transactions: keyed by id, unique index on hash, indexed by
//!   (service, status) and by entity reference
//! - events: append-only per transaction, ordered by sequence
//! - wallets: keyed by service name

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::custody::types::WalletRecord;
use crate::txn::model::{EntityRef, Transaction, TransactionEvent};
use crate::txn::state::TxStatus;

pub use memory::MemoryStore;
pub use sql::SqlStore;

/// Default and maximum page sizes for listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// Errors raised by record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("idempotency key already used by transaction {}", .0.id)]
    Duplicate(Box<Transaction>),

    #[error("revision conflict on transaction {}", .0.id)]
    Conflict(Box<Transaction>),

    #[error("hash {hash} already belongs to transaction {owner}")]
    HashInUse { hash: String, owner: String },

    #[error("wallet for service {0} already exists")]
    WalletExists(String),

    #[error("wallet for service {0} not found")]
    WalletNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub service: Option<String>,
    pub status: Option<TxStatus>,
    pub entity: Option<EntityRef>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.service.as_ref().map_or(true, |s| &tx.service == s)
            && self.status.map_or(true, |s| tx.status == s)
            && self
                .entity
                .as_ref()
                .map_or(true, |e| tx.entity.as_ref() == Some(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Limit clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Durable table of transactions and their event log.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record with its `created` event.
    ///
    /// Fails with `Duplicate` when the service already used the
    /// record's idempotency key.
    async fn insert(&self, tx: Transaction, event: TransactionEvent) -> StoreResult<Transaction>;

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>>;

    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<Transaction>>;

    /// Newest first.
    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>>;

    /// Every non-terminal record.
    async fn list_open(&self) -> StoreResult<Vec<Transaction>>;

    /// Replace the record and append `event`, both or neither.
    ///
    /// Fails with `Conflict` (carrying the stored copy) when the stored
    /// revision is not `expected_revision`.
    async fn apply_transition(
        &self,
        expected_revision: u64,
        next: Transaction,
        event: TransactionEvent,
    ) -> StoreResult<Transaction>;

    /// Events in transition order.
    async fn events(&self, id: &str) -> StoreResult<Vec<TransactionEvent>>;
}

/// Encrypted signing identities, one per service.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_wallet(&self, service: &str) -> StoreResult<Option<WalletRecord>>;

    /// Create-once; fails with `WalletExists` if the service has one.
    async fn put_wallet(&self, record: WalletRecord) -> StoreResult<WalletRecord>;

    async fn revoke_wallet(&self, service: &str, at: DateTime<Utc>) -> StoreResult<WalletRecord>;
}
