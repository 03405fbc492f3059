//! In-memory copy of open transactions.
//!
//! # Design Decisions
//! - Holds clones only; the store is the source of truth
//! - Terminal records are evicted on write
//! - Readers never block each other; writers hold the lock for one record
//! - Callers take snapshots and release the lock before any network call

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::txn::model::Transaction;

#[derive(Debug, Default)]
pub struct TxCache {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl TxCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-through after a committed change. Ignores copies older than
    /// what is already cached.
    pub fn sync(&self, tx: &Transaction) {
        let mut map = self.inner.write();
        if tx.is_terminal() {
            map.remove(&tx.id);
            return;
        }
        match map.get(&tx.id) {
            Some(cached) if cached.revision > tx.revision => {}
            _ => {
                map.insert(tx.id.clone(), tx.clone());
            }
        }
    }

    /// Replace whatever is cached with the store's copy.
    pub fn overwrite(&self, tx: &Transaction) {
        let mut map = self.inner.write();
        if tx.is_terminal() {
            map.remove(&tx.id);
        } else {
            map.insert(tx.id.clone(), tx.clone());
        }
    }

    /// Rebuild from a full store read. Entries committed after the read
    /// (higher revision) survive.
    pub fn replace_all(&self, open: Vec<Transaction>) {
        let mut map = self.inner.write();
        let mut fresh: HashMap<String, Transaction> = HashMap::with_capacity(open.len());
        for tx in open.into_iter().filter(|t| !t.is_terminal()) {
            let newer = map
                .get(&tx.id)
                .filter(|cached| cached.revision > tx.revision)
                .cloned();
            fresh.insert(tx.id.clone(), newer.unwrap_or(tx));
        }
        *map = fresh;
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.inner.read().get(id).cloned()
    }

    /// Clones of every cached record, oldest first.
    pub fn open_snapshot(&self) -> Vec<Transaction> {
        let mut open: Vec<Transaction> = self.inner.read().values().cloned().collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        open
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::model::{OperationPayload, TransactionRequest};
    use crate::txn::state::TxStatus;
    use chrono::Utc;

    fn record() -> Transaction {
        Transaction::new_created(
            TransactionRequest::new("oracle", OperationPayload::script("AQID")),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_sync_ignores_older_revision() {
        let cache = TxCache::new();
        let mut tx = record();
        tx.revision = 3;
        tx.status = TxStatus::Pending;
        cache.sync(&tx);

        let mut stale = tx.clone();
        stale.revision = 2;
        stale.status = TxStatus::Submitted;
        cache.sync(&stale);

        assert_eq!(cache.get(&tx.id).unwrap().status, TxStatus::Pending);

        cache.overwrite(&stale);
        assert_eq!(cache.get(&tx.id).unwrap().status, TxStatus::Submitted);
    }

    #[test]
    fn test_terminal_records_evicted() {
        let cache = TxCache::new();
        let mut tx = record();
        cache.sync(&tx);
        assert_eq!(cache.len(), 1);

        tx.status = TxStatus::Confirmed;
        tx.revision = 4;
        cache.sync(&tx);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_all_keeps_newer_entries() {
        let cache = TxCache::new();
        let mut a = record();
        a.revision = 5;
        cache.sync(&a);
        let orphan = record();
        cache.sync(&orphan);

        let mut loaded_a = a.clone();
        loaded_a.revision = 4;
        let b = record();
        cache.replace_all(vec![loaded_a, b.clone()]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a.id).unwrap().revision, 5);
        assert!(cache.get(&b.id).is_some());
        assert!(cache.get(&orphan.id).is_none());
    }
}
