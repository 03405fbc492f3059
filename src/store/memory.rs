//! Lock-guarded volatile store for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::custody::types::WalletRecord;
use crate::store::{
    Page, PageRequest, StoreError, StoreResult, TransactionFilter, TransactionStore, WalletStore,
};
use crate::txn::model::{Transaction, TransactionEvent};

#[derive(Debug, Default)]
struct Inner {
    transactions: HashMap<String, Transaction>,
    events: HashMap<String, Vec<TransactionEvent>>,
    wallets: HashMap<String, WalletRecord>,
    by_hash: HashMap<String, String>,
    by_idempotency: HashMap<(String, String), String>,
}

impl Inner {
    fn claim_hash(&mut self, tx: &Transaction, previous: Option<&str>) -> StoreResult<()> {
        let Some(hash) = tx.hash.as_deref() else {
            return Ok(());
        };
        if previous == Some(hash) {
            return Ok(());
        }
        if let Some(owner) = self.by_hash.get(hash) {
            if owner != &tx.id {
                return Err(StoreError::HashInUse {
                    hash: hash.to_string(),
                    owner: owner.clone(),
                });
            }
        }
        if let Some(old) = previous {
            self.by_hash.remove(old);
        }
        self.by_hash.insert(hash.to_string(), tx.id.clone());
        Ok(())
    }
}

/// Transaction and wallet tables held in process memory only.
///
/// Every mutation happens under one write lock, so a record and its event
/// land together. Nothing survives the process; durable deployments use
/// [`SqlStore`](crate::store::SqlStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, tx: Transaction, event: TransactionEvent) -> StoreResult<Transaction> {
        {
            let mut inner = self.inner.write();

            if let Some(key) = &tx.idempotency_key {
                let index_key = (tx.service.clone(), key.clone());
                if let Some(existing) = inner
                    .by_idempotency
                    .get(&index_key)
                    .and_then(|id| inner.transactions.get(id))
                {
                    return Err(StoreError::Duplicate(Box::new(existing.clone())));
                }
            }
            if let Some(existing) = inner.transactions.get(&tx.id) {
                return Err(StoreError::Conflict(Box::new(existing.clone())));
            }

            inner.claim_hash(&tx, None)?;
            if let Some(key) = &tx.idempotency_key {
                inner
                    .by_idempotency
                    .insert((tx.service.clone(), key.clone()), tx.id.clone());
            }
            inner.events.insert(tx.id.clone(), vec![event]);
            inner.transactions.insert(tx.id.clone(), tx.clone());
        }
        Ok(tx)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.inner.read().transactions.get(id).cloned())
    }

    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.read();
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|id| inner.transactions.get(id))
            .cloned())
    }

    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>> {
        let limit = page.effective_limit();
        let mut matching: Vec<Transaction> = self
            .inner
            .read()
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len();
        let items = matching.into_iter().skip(page.offset).take(limit).collect();
        Ok(Page {
            items,
            total,
            offset: page.offset,
            limit,
        })
    }

    async fn list_open(&self) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .inner
            .read()
            .transactions
            .values()
            .filter(|tx| !tx.is_terminal())
            .cloned()
            .collect())
    }

    async fn apply_transition(
        &self,
        expected_revision: u64,
        next: Transaction,
        event: TransactionEvent,
    ) -> StoreResult<Transaction> {
        {
            let mut inner = self.inner.write();
            let current = inner
                .transactions
                .get(&next.id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;

            if current.revision != expected_revision {
                return Err(StoreError::Conflict(Box::new(current)));
            }

            inner.claim_hash(&next, current.hash.as_deref())?;
            inner
                .events
                .entry(next.id.clone())
                .or_default()
                .push(event);
            inner.transactions.insert(next.id.clone(), next.clone());
        }
        Ok(next)
    }

    async fn events(&self, id: &str) -> StoreResult<Vec<TransactionEvent>> {
        Ok(self
            .inner
            .read()
            .events
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn get_wallet(&self, service: &str) -> StoreResult<Option<WalletRecord>> {
        Ok(self.inner.read().wallets.get(service).cloned())
    }

    async fn put_wallet(&self, record: WalletRecord) -> StoreResult<WalletRecord> {
        {
            let mut inner = self.inner.write();
            if inner.wallets.contains_key(&record.service) {
                return Err(StoreError::WalletExists(record.service));
            }
            inner
                .wallets
                .insert(record.service.clone(), record.clone());
        }
        Ok(record)
    }

    async fn revoke_wallet(&self, service: &str, at: DateTime<Utc>) -> StoreResult<WalletRecord> {
        let revoked = {
            let mut inner = self.inner.write();
            let record = inner
                .wallets
                .get_mut(service)
                .ok_or_else(|| StoreError::WalletNotFound(service.to_string()))?;
            if record.revoked_at.is_none() {
                record.revoked_at = Some(at);
            }
            record.clone()
        };
        Ok(revoked)
    }
}
