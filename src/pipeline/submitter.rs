//! Submission pipeline.
//!
//! # Responsibilities
//! - Validate and persist new requests as `created` records
//! - Hand the first broadcast off to a detached task
//! - Sign and broadcast a record's payload under deadlines (also used for
//!   rebroadcasts)
//! - Keep one attempt per record in flight at a time
//!
//! # Design Decisions
//! - The caller waits only for the `created` record
//! - Errors after that point become record state, never caller errors
//! - Transient first-broadcast failures leave the record `created`; the
//!   Tracker resumes it later

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::SubmissionConfig;
use crate::custody::{CustodyError, KeyCustodian, SignedPayload};
use crate::gateway::{ChainGateway, GatewayError};
use crate::pipeline::validation::validate_request;
use crate::resilience::with_timeout;
use crate::txn::{ManagerError, ManagerResult, StateRecorder, Transaction, TransactionRequest, TxStatus};

/// Marks a record as having an attempt in progress; released on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

pub struct SubmissionPipeline {
    config: SubmissionConfig,
    auto_create_identities: bool,
    recorder: Arc<StateRecorder>,
    custodian: Arc<KeyCustodian>,
    gateway: Arc<dyn ChainGateway>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Last first-broadcast attempt per `created` record. In memory only;
    /// after a restart records fall back to their creation time.
    attempts: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SubmissionPipeline {
    pub fn new(
        config: SubmissionConfig,
        auto_create_identities: bool,
        recorder: Arc<StateRecorder>,
        custodian: Arc<KeyCustodian>,
        gateway: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            config,
            auto_create_identities,
            recorder,
            custodian,
            gateway,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Validate, persist as `created`, and start the first broadcast in
    /// the background.
    ///
    /// A request reusing an idempotency key returns the existing record and
    /// broadcasts nothing.
    pub async fn create(
        self: &Arc<Self>,
        request: TransactionRequest,
        now: DateTime<Utc>,
    ) -> ManagerResult<Transaction> {
        self.create_linked(request, None, now).await
    }

    /// Like [`SubmissionPipeline::create`], recording the record it retries.
    pub async fn create_linked(
        self: &Arc<Self>,
        request: TransactionRequest,
        retry_of: Option<String>,
        now: DateTime<Utc>,
    ) -> ManagerResult<Transaction> {
        validate_request(&request, &self.config)?;

        let tx = Transaction::new_created(request, retry_of, now);
        let (tx, inserted) = self.recorder.record_created(tx).await?;
        if !inserted {
            tracing::info!(
                tx_id = %tx.id,
                service = %tx.service,
                status = %tx.status,
                "Idempotency key reused, returning existing transaction"
            );
            return Ok(tx);
        }

        tracing::info!(
            tx_id = %tx.id,
            service = %tx.service,
            entity = ?tx.entity.as_ref().map(|e| e.to_string()),
            retry_of = ?tx.retry_of,
            "Transaction created"
        );
        self.dispatch(tx.clone());
        Ok(tx)
    }

    /// Run the first broadcast of `tx` on a detached task.
    pub fn dispatch(self: &Arc<Self>, tx: Transaction) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let id = tx.id.clone();
            if let Err(e) = pipeline.submit(tx, Utc::now()).await {
                tracing::warn!(tx_id = %id, error = %e, "First broadcast not recorded");
            }
        })
    }

    /// First broadcast of a `created` record: `submitted` on success,
    /// `failed` on a fatal error, unchanged on a transient one.
    ///
    /// Returns the record as it stands afterwards.
    pub async fn submit(&self, tx: Transaction, now: DateTime<Utc>) -> ManagerResult<Transaction> {
        let Some(_guard) = self.try_begin(&tx.id) else {
            tracing::debug!(tx_id = %tx.id, "Attempt already in flight, skipping");
            return Ok(tx);
        };

        // Someone else may have moved the record since the caller's copy.
        let tx = match self.recorder.cache().get(&tx.id) {
            Some(cached) if cached.revision > tx.revision => cached,
            _ => tx,
        };
        if tx.status != TxStatus::Created {
            return Ok(tx);
        }

        self.attempts.lock().insert(tx.id.clone(), now);
        let outcome = self.sign_and_broadcast(&tx).await;
        let done_at = Utc::now().max(now);

        match outcome {
            Ok(hash) => {
                self.attempts.lock().remove(&tx.id);
                let detail = serde_json::json!({ "hash": hash });
                let submitted = self
                    .recorder
                    .transition(&tx, TxStatus::Submitted, detail, done_at, |next| {
                        next.hash = Some(hash.clone());
                        next.submitted_at = Some(done_at);
                        next.last_broadcast_at = Some(done_at);
                        next.error = None;
                    })
                    .await?;
                tracing::info!(tx_id = %submitted.id, hash = %hash, "Transaction submitted");
                Ok(submitted)
            }
            Err(e) if e.is_fatal_to_attempt() => {
                self.attempts.lock().remove(&tx.id);
                tracing::warn!(tx_id = %tx.id, error = %e, kind = ?e.kind(), "First broadcast failed");
                let detail = serde_json::json!({ "error": e.to_string(), "kind": format!("{:?}", e.kind()) });
                let message = e.to_string();
                self.recorder
                    .transition(&tx, TxStatus::Failed, detail, done_at, |next| {
                        next.error = Some(message);
                    })
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    tx_id = %tx.id,
                    error = %e,
                    "Transient error on first broadcast, will resume"
                );
                Ok(tx)
            }
        }
    }

    /// Sign the record's payload and send it. Every step runs under its
    /// deadline; a deadline miss is a transient gateway error.
    pub async fn sign_and_broadcast(&self, tx: &Transaction) -> ManagerResult<String> {
        let message = signing_message(tx)?;

        let limit = self.config.sign_timeout();
        let signed = match tokio::time::timeout(limit, self.sign(&tx.service, &message)).await {
            Ok(signed) => signed?,
            Err(_) => return Err(GatewayError::Timeout(limit).into()),
        };

        let hash = with_timeout(self.config.broadcast_timeout(), self.gateway.broadcast(&signed)).await?;
        Ok(hash)
    }

    async fn sign(&self, service: &str, message: &[u8]) -> Result<SignedPayload, CustodyError> {
        match self.custodian.sign(service, message).await {
            Err(CustodyError::IdentityNotFound(_)) if self.auto_create_identities => {
                self.custodian.create_identity(service, Utc::now()).await?;
                self.custodian.sign(service, message).await
            }
            other => other,
        }
    }

    /// Claim the single attempt slot for `id`.
    pub fn try_begin(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock();
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id: id.to_string(),
        })
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Last first-broadcast attempt for a `created` record.
    pub fn last_attempt(&self, id: &str) -> Option<DateTime<Utc>> {
        self.attempts.lock().get(id).copied()
    }

    /// Forget attempt bookkeeping for a record that left `created`.
    pub fn forget(&self, id: &str) {
        self.attempts.lock().remove(id);
    }
}

/// Bytes that get signed: the record id binds the signature to exactly
/// one logical transaction.
pub fn signing_message(tx: &Transaction) -> ManagerResult<Vec<u8>> {
    serde_json::to_vec(&serde_json::json!({
        "id": tx.id,
        "service": tx.service,
        "payload": tx.payload,
        "fees": tx.fees,
    }))
    .map_err(|e| ManagerError::Validation(format!("payload not serializable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::MasterKey;
    use crate::gateway::MockGateway;
    use crate::store::{MemoryStore, TransactionStore};
    use crate::tracker::cache::TxCache;
    use crate::txn::OperationPayload;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        pipeline: Arc<SubmissionPipeline>,
    }

    fn harness(auto_create: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let recorder = Arc::new(StateRecorder::new(store.clone(), Arc::new(TxCache::new())));
        let custodian = Arc::new(KeyCustodian::new(store.clone(), MasterKey::derive(b"test").unwrap()));
        let pipeline = Arc::new(SubmissionPipeline::new(
            SubmissionConfig::default(),
            auto_create,
            recorder,
            custodian,
            gateway.clone(),
        ));
        Harness { store, gateway, pipeline }
    }

    fn request() -> TransactionRequest {
        TransactionRequest::new("oracle", OperationPayload::script("DAAUAQID"))
    }

    #[tokio::test]
    async fn test_submit_records_hash() {
        let h = harness(true);
        let tx = Transaction::new_created(request(), None, Utc::now());
        let (tx, _) = h.pipeline.recorder.record_created(tx).await.unwrap();

        let submitted = h.pipeline.submit(tx, Utc::now()).await.unwrap();
        assert_eq!(submitted.status, TxStatus::Submitted);
        assert_eq!(h.gateway.broadcast_count(), 1);
        assert_eq!(submitted.hash, Some(h.gateway.broadcasts()[0].wire_hash()));
        assert!(submitted.submitted_at.is_some());
        assert!(!h.pipeline.is_in_flight(&submitted.id));
    }

    #[tokio::test]
    async fn test_missing_identity_fails_record() {
        let h = harness(false);
        let tx = Transaction::new_created(request(), None, Utc::now());
        let (tx, _) = h.pipeline.recorder.record_created(tx).await.unwrap();

        let failed = h.pipeline.submit(tx, Utc::now()).await.unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert!(failed.error.unwrap().contains("no signing identity"));
        assert_eq!(h.gateway.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_broadcast_fails_record() {
        let h = harness(true);
        h.gateway.fail_next_broadcast(GatewayError::Rejected("InsufficientFunds".into()));
        let tx = Transaction::new_created(request(), None, Utc::now());
        let (tx, _) = h.pipeline.recorder.record_created(tx).await.unwrap();

        let failed = h.pipeline.submit(tx, Utc::now()).await.unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        let events = h.store.events(&failed.id).await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.status).collect::<Vec<_>>(),
            vec![TxStatus::Created, TxStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_transient_broadcast_leaves_created() {
        let h = harness(true);
        h.gateway.fail_next_broadcast(GatewayError::Timeout(Duration::from_secs(10)));
        let now = Utc::now();
        let tx = Transaction::new_created(request(), None, now);
        let (tx, _) = h.pipeline.recorder.record_created(tx).await.unwrap();

        let still = h.pipeline.submit(tx.clone(), now).await.unwrap();
        assert_eq!(still.status, TxStatus::Created);
        assert_eq!(h.pipeline.last_attempt(&tx.id), Some(now));
        assert_eq!(h.store.events(&tx.id).await.unwrap().len(), 1);

        let submitted = h.pipeline.submit(still, Utc::now()).await.unwrap();
        assert_eq!(submitted.status, TxStatus::Submitted);
        assert_eq!(h.pipeline.last_attempt(&tx.id), None);
    }

    #[tokio::test]
    async fn test_in_flight_guard() {
        let h = harness(true);
        let guard = h.pipeline.try_begin("tx-1").unwrap();
        assert!(h.pipeline.try_begin("tx-1").is_none());
        assert!(h.pipeline.is_in_flight("tx-1"));
        drop(guard);
        assert!(h.pipeline.try_begin("tx-1").is_some());
    }

    #[tokio::test]
    async fn test_create_validates_synchronously() {
        let h = harness(true);
        let mut bad = request();
        bad.payload.script.clear();

        let err = h.pipeline.create(bad, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
        let page = h
            .store
            .list(&Default::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_signing_message_binds_id() {
        let a = Transaction::new_created(request(), None, Utc::now());
        let b = Transaction::new_created(request(), None, Utc::now());
        assert_ne!(signing_message(&a).unwrap(), signing_message(&b).unwrap());
        assert_eq!(signing_message(&a).unwrap(), signing_message(&a.clone()).unwrap());
    }
}
