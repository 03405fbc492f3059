//! Rebroadcast of stuck transactions.
//!
//! # Responsibilities
//! - Decide, from record state and the clock, whether a retry is due
//! - Rebroadcast `submitted` records, logging each attempt as a
//!   `submitted → submitted` event
//! - Resume `created` records whose first broadcast never went out
//!
//! # Design Decisions
//! - No retry count limit; the Tracker's age ceiling ends the attempts
//! - A fatal error (signing, validation, execution) halts rebroadcasts; the
//!   record keeps its last accepted hash and runs to a receipt or expiry
//! - The wait before the next attempt doubles with every rebroadcast
//! - Candidates come from the same tick's mempool/receipt checks, so a
//!   record already seen on chain is never a candidate
//! - A candidate whose cached copy moved on since the tick read it is skipped

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ResubmitConfig;
use crate::observability::metrics;
use crate::pipeline::SubmissionPipeline;
use crate::resilience::{calculate_backoff, elapsed};
use crate::txn::{ManagerError, ManagerResult, StateRecorder, Transaction, TxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// `submitted` but not seen by the network after the backoff window.
    Rebroadcast,
    /// `created` and its first broadcast failed transiently.
    Resume,
}

#[derive(Debug, Clone)]
pub struct ResubmitCandidate {
    pub tx: Transaction,
    pub kind: CandidateKind,
}

/// Outcome counts for one batch of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResubmitReport {
    pub rebroadcast: usize,
    pub resumed: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum Outcome {
    Rebroadcast,
    Resumed,
    Skipped,
    Error,
}

pub struct Resubmitter {
    pipeline: Arc<SubmissionPipeline>,
    recorder: Arc<StateRecorder>,
    config: ResubmitConfig,
    concurrency: usize,
}

impl Resubmitter {
    pub fn new(
        pipeline: Arc<SubmissionPipeline>,
        recorder: Arc<StateRecorder>,
        config: ResubmitConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            pipeline,
            recorder,
            config,
            concurrency: concurrency.max(1),
        }
    }

    /// Minimum time since the last broadcast before the next rebroadcast.
    pub fn next_delay(&self, tx: &Transaction) -> Duration {
        calculate_backoff(
            tx.resubmit_count,
            self.config.resubmit_after(),
            self.config.max_backoff(),
        )
    }

    /// Whether `tx` is eligible for another attempt at `now`.
    pub fn is_due(&self, tx: &Transaction, now: DateTime<Utc>) -> bool {
        match tx.status {
            TxStatus::Submitted if tx.halted => false,
            TxStatus::Submitted => tx.since_last_broadcast(now) >= self.next_delay(tx),
            TxStatus::Created => {
                let since = self.pipeline.last_attempt(&tx.id).unwrap_or(tx.created_at);
                elapsed(since, now) >= self.config.resubmit_after()
            }
            _ => false,
        }
    }

    /// Act on one tick's candidates.
    pub async fn process_at(&self, candidates: Vec<ResubmitCandidate>, now: DateTime<Utc>) -> ResubmitReport {
        let outcomes: Vec<Outcome> = stream::iter(candidates)
            .map(|candidate| self.process_one(candidate, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ResubmitReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Rebroadcast => report.rebroadcast += 1,
                Outcome::Resumed => report.resumed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Error => report.errors += 1,
            }
        }
        report
    }

    async fn process_one(&self, candidate: ResubmitCandidate, now: DateTime<Utc>) -> Outcome {
        let id = candidate.tx.id.clone();
        let result = match candidate.kind {
            CandidateKind::Rebroadcast => self.rebroadcast(candidate.tx, now).await,
            CandidateKind::Resume => self.resume(candidate.tx, now).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(ManagerError::Conflict { current, .. }) => {
                tracing::debug!(tx_id = %id, store_status = %current, "Candidate moved on, skipping");
                Outcome::Skipped
            }
            Err(e) => {
                tracing::error!(tx_id = %id, error = %e, "Resubmission failed");
                Outcome::Error
            }
        }
    }

    /// Rebroadcast a `submitted` record.
    async fn rebroadcast(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Outcome> {
        let Some(_guard) = self.pipeline.try_begin(&tx.id) else {
            return Ok(Outcome::Skipped);
        };

        // Never act on a copy the cache has moved past (confirmed, cancelled...).
        match self.recorder.cache().get(&tx.id) {
            Some(current)
                if current.revision == tx.revision
                    && current.status == TxStatus::Submitted
                    && !current.halted => {}
            _ => return Ok(Outcome::Skipped),
        }

        let attempt = tx.resubmit_count + 1;
        match self.pipeline.sign_and_broadcast(&tx).await {
            Ok(hash) => {
                let detail = serde_json::json!({
                    "retry": attempt,
                    "hash": hash,
                    "previous_hash": tx.hash,
                    "error": null,
                });
                let updated = self
                    .recorder
                    .transition(&tx, TxStatus::Submitted, detail, now, |next| {
                        next.resubmit_count = attempt;
                        next.last_broadcast_at = Some(now);
                        next.hash = Some(hash.clone());
                    })
                    .await?;

                metrics::record_resubmission(&updated.service);
                tracing::info!(
                    tx_id = %updated.id,
                    attempt,
                    hash = ?updated.hash,
                    next_delay_secs = self.next_delay(&updated).as_secs(),
                    "Transaction rebroadcast"
                );
                Ok(Outcome::Rebroadcast)
            }
            Err(e) if e.is_fatal_to_attempt() => {
                tracing::warn!(
                    tx_id = %tx.id,
                    attempt,
                    error = %e,
                    kind = ?e.kind(),
                    hash = ?tx.hash,
                    "Rebroadcast halted, tracking last accepted broadcast until expiry"
                );
                let message = e.to_string();
                let detail = serde_json::json!({
                    "halted": true,
                    "attempt": attempt,
                    "hash": tx.hash,
                    "error": message,
                    "kind": format!("{:?}", e.kind()),
                });
                self.recorder
                    .transition(&tx, TxStatus::Submitted, detail, now, |next| {
                        next.halted = true;
                        next.error = Some(message.clone());
                    })
                    .await?;
                Ok(Outcome::Error)
            }
            Err(e) => {
                tracing::warn!(
                    tx_id = %tx.id,
                    attempt,
                    error = %e,
                    kind = ?e.kind(),
                    "Rebroadcast attempt failed"
                );
                // Still counts toward the backoff so a flapping node is not hammered.
                let detail = serde_json::json!({
                    "retry": attempt,
                    "hash": null,
                    "previous_hash": tx.hash,
                    "error": e.to_string(),
                });
                self.recorder
                    .transition(&tx, TxStatus::Submitted, detail, now, |next| {
                        next.resubmit_count = attempt;
                        next.last_broadcast_at = Some(now);
                    })
                    .await?;
                Ok(Outcome::Error)
            }
        }
    }

    async fn resume(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Outcome> {
        tracing::info!(tx_id = %tx.id, "Resuming first broadcast");
        let after = self.pipeline.submit(tx, now).await?;
        Ok(if after.status == TxStatus::Created {
            Outcome::Skipped
        } else {
            Outcome::Resumed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmissionConfig;
    use crate::custody::{KeyCustodian, MasterKey};
    use crate::gateway::{GatewayError, MockGateway};
    use crate::store::{MemoryStore, TransactionStore};
    use crate::tracker::cache::TxCache;
    use crate::txn::{OperationPayload, TransactionRequest};

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        recorder: Arc<StateRecorder>,
        pipeline: Arc<SubmissionPipeline>,
        resubmitter: Resubmitter,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let recorder = Arc::new(StateRecorder::new(store.clone(), Arc::new(TxCache::new())));
        let custodian = Arc::new(KeyCustodian::new(store.clone(), MasterKey::derive(b"test").unwrap()));
        let pipeline = Arc::new(SubmissionPipeline::new(
            SubmissionConfig::default(),
            true,
            recorder.clone(),
            custodian,
            gateway.clone(),
        ));
        let config = ResubmitConfig {
            resubmit_after_secs: 30,
            max_backoff_secs: 240,
        };
        let resubmitter = Resubmitter::new(pipeline.clone(), recorder.clone(), config, 4);
        Harness {
            store,
            gateway,
            recorder,
            pipeline,
            resubmitter,
        }
    }

    async fn submitted(h: &Harness, now: DateTime<Utc>) -> Transaction {
        let tx = Transaction::new_created(
            TransactionRequest::new("oracle", OperationPayload::script("DAAUAQID")),
            None,
            now,
        );
        let (tx, _) = h.recorder.record_created(tx).await.unwrap();
        h.pipeline.submit(tx, now).await.unwrap()
    }

    #[tokio::test]
    async fn test_backoff_doubles() {
        let h = harness();
        let now = Utc::now();
        let mut tx = submitted(&h, now).await;
        tx.last_broadcast_at = Some(now);

        assert_eq!(h.resubmitter.next_delay(&tx), Duration::from_secs(30));
        assert!(!h.resubmitter.is_due(&tx, now + chrono::Duration::seconds(29)));
        assert!(h.resubmitter.is_due(&tx, now + chrono::Duration::seconds(30)));

        tx.resubmit_count = 2;
        assert_eq!(h.resubmitter.next_delay(&tx), Duration::from_secs(120));
        tx.resubmit_count = 10;
        assert_eq!(h.resubmitter.next_delay(&tx), Duration::from_secs(240));
    }

    #[tokio::test]
    async fn test_rebroadcast_logs_retry_event() {
        let h = harness();
        let start = Utc::now();
        let tx = submitted(&h, start).await;
        let later = start + chrono::Duration::seconds(45);

        let report = h
            .resubmitter
            .process_at(
                vec![ResubmitCandidate {
                    tx: tx.clone(),
                    kind: CandidateKind::Rebroadcast,
                }],
                later,
            )
            .await;
        assert_eq!(report.rebroadcast, 1);
        assert_eq!(h.gateway.broadcast_count(), 2);

        let stored = h.store.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Submitted);
        assert_eq!(stored.resubmit_count, 1);
        assert_eq!(stored.last_broadcast_at, Some(later));
        // Deterministic signatures: the rebroadcast carries the same hash.
        assert_eq!(stored.hash, tx.hash);

        let events = h.store.events(&tx.id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].status, TxStatus::Submitted);
        assert_eq!(events[2].detail["retry"], 1);
    }

    #[tokio::test]
    async fn test_stale_candidate_skipped() {
        let h = harness();
        let start = Utc::now();
        let mut stale = submitted(&h, start).await;
        stale.revision -= 1;

        let report = h
            .resubmitter
            .process_at(
                vec![ResubmitCandidate {
                    tx: stale,
                    kind: CandidateKind::Rebroadcast,
                }],
                start + chrono::Duration::seconds(60),
            )
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(h.gateway.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_rebroadcast_still_backs_off() {
        let h = harness();
        let start = Utc::now();
        let tx = submitted(&h, start).await;
        h.gateway
            .fail_next_broadcast(GatewayError::Timeout(Duration::from_secs(10)));

        let later = start + chrono::Duration::seconds(31);
        let report = h
            .resubmitter
            .process_at(
                vec![ResubmitCandidate {
                    tx: tx.clone(),
                    kind: CandidateKind::Rebroadcast,
                }],
                later,
            )
            .await;
        assert_eq!(report.rebroadcast, 0);
        assert_eq!(report.errors, 1);

        let stored = h.store.get(&tx.id).await.unwrap().unwrap();
        assert!(!stored.halted);
        assert_eq!(stored.resubmit_count, 1);
        assert_eq!(stored.hash, tx.hash);
        assert!(!h.resubmitter.is_due(&stored, later + chrono::Duration::seconds(59)));
        assert!(h.resubmitter.is_due(&stored, later + chrono::Duration::seconds(60)));
        let events = h.store.events(&tx.id).await.unwrap();
        assert!(events[2].detail["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_fatal_rebroadcast_error_halts_retries() {
        let h = harness();
        let start = Utc::now();
        let tx = submitted(&h, start).await;
        h.gateway
            .fail_next_broadcast(GatewayError::Rejected("insufficient funds".into()));

        let later = start + chrono::Duration::seconds(31);
        let report = h
            .resubmitter
            .process_at(
                vec![ResubmitCandidate {
                    tx: tx.clone(),
                    kind: CandidateKind::Rebroadcast,
                }],
                later,
            )
            .await;
        assert_eq!(report.rebroadcast, 0);
        assert_eq!(report.errors, 1);

        let stored = h.store.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Submitted);
        assert!(stored.halted);
        assert_eq!(stored.resubmit_count, 0);
        assert_eq!(stored.hash, tx.hash);
        assert!(stored.error.as_deref().unwrap().contains("insufficient funds"));
        assert!(!h.resubmitter.is_due(&stored, later + chrono::Duration::seconds(3600)));

        let events = h.store.events(&tx.id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].detail["halted"], true);

        // A halted record offered again is left alone.
        let report = h
            .resubmitter
            .process_at(
                vec![ResubmitCandidate {
                    tx: stored,
                    kind: CandidateKind::Rebroadcast,
                }],
                later + chrono::Duration::seconds(120),
            )
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(h.gateway.broadcast_count(), 1);
        assert_eq!(h.store.events(&tx.id).await.unwrap().len(), 3);
    }
}
