//! The single write path for state transitions.
//!
//! Every transition goes store-first: the record update and its event are
//! committed together, then the result is written through to the Tracker
//! cache. A revision mismatch means somebody else moved the record; the
//! store's copy replaces the cached one and the caller gets `Conflict`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::observability::metrics;
use crate::store::{StoreError, TransactionStore};
use crate::tracker::cache::TxCache;
use crate::txn::error::{ManagerError, ManagerResult};
use crate::txn::model::{Transaction, TransactionEvent};
use crate::txn::state::TxStatus;

pub struct StateRecorder {
    store: Arc<dyn TransactionStore>,
    cache: Arc<TxCache>,
}

impl StateRecorder {
    pub fn new(store: Arc<dyn TransactionStore>, cache: Arc<TxCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<TxCache> {
        &self.cache
    }

    /// Persist a brand-new `created` record together with its first event.
    ///
    /// Returns the existing record instead when the idempotency key was
    /// already used by the same service.
    pub async fn record_created(&self, tx: Transaction) -> ManagerResult<(Transaction, bool)> {
        let detail = serde_json::json!({
            "service": tx.service,
            "entity": tx.entity.as_ref().map(|e| e.to_string()),
            "retry_of": tx.retry_of,
        });
        let event = TransactionEvent::for_record(&tx, detail);

        match self.store.insert(tx, event).await {
            Ok(stored) => {
                self.cache.sync(&stored);
                metrics::record_transition(TxStatus::Created);
                Ok((stored, true))
            }
            Err(StoreError::Duplicate(existing)) => Ok((*existing, false)),
            Err(e) => Err(e.into()),
        }
    }

    /// Move `tx` to `to`, applying `update` to the record's fields.
    ///
    /// `tx` is the caller's view of the record; its revision is the
    /// optimistic concurrency token.
    pub async fn transition<F>(
        &self,
        tx: &Transaction,
        to: TxStatus,
        detail: serde_json::Value,
        now: DateTime<Utc>,
        update: F,
    ) -> ManagerResult<Transaction>
    where
        F: FnOnce(&mut Transaction),
    {
        if !tx.status.can_transition_to(to) {
            return Err(ManagerError::InvalidTransition {
                from: tx.status,
                to,
            });
        }

        let mut next = tx.clone();
        update(&mut next);
        next.status = to;
        next.revision = tx.revision + 1;
        next.updated_at = now;

        let event = TransactionEvent::for_record(&next, detail);

        match self.store.apply_transition(tx.revision, next, event).await {
            Ok(stored) => {
                tracing::debug!(
                    tx_id = %stored.id,
                    from = %tx.status,
                    to = %stored.status,
                    revision = stored.revision,
                    "Transaction transitioned"
                );
                self.cache.sync(&stored);
                metrics::record_transition(to);
                Ok(stored)
            }
            Err(StoreError::Conflict(current)) => {
                tracing::warn!(
                    tx_id = %current.id,
                    expected_revision = tx.revision,
                    store_revision = current.revision,
                    store_status = %current.status,
                    "Stale transaction copy, refreshing cache from store"
                );
                self.cache.overwrite(&current);
                Err(ManagerError::Conflict {
                    id: current.id.clone(),
                    current: current.status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
