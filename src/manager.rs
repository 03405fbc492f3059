//! Caller-facing facade.
//!
//! Wires the subsystems together and exposes the operations calling
//! services use. Creation returns as soon as the `created` record is
//! durable; everything after that is learned by polling records or events.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::custody::{Identity, KeyCustodian, MasterKey};
use crate::gateway::ChainGateway;
use crate::lifecycle::Shutdown;
use crate::nodes::{HealthMonitor, NodeRegistry, PartitionDetector};
use crate::pipeline::SubmissionPipeline;
use crate::resubmit::Resubmitter;
use crate::store::{Page, PageRequest, TransactionFilter, TransactionStore, WalletStore};
use crate::tracker::{Tracker, TxCache};
use crate::txn::{
    ManagerError, ManagerResult, StateRecorder, Transaction, TransactionEvent, TransactionRequest,
    TxStatus,
};

pub struct TransactionManager {
    config: ManagerConfig,
    store: Arc<dyn TransactionStore>,
    recorder: Arc<StateRecorder>,
    custodian: Arc<KeyCustodian>,
    gateway: Arc<dyn ChainGateway>,
    registry: Arc<NodeRegistry>,
    pipeline: Arc<SubmissionPipeline>,
    detector: Arc<PartitionDetector>,
    tracker: Arc<Tracker>,
}

impl TransactionManager {
    pub fn new<S>(
        config: ManagerConfig,
        store: Arc<S>,
        gateway: Arc<dyn ChainGateway>,
        registry: Arc<NodeRegistry>,
        master: MasterKey,
    ) -> Self
    where
        S: TransactionStore + WalletStore + 'static,
    {
        let transactions: Arc<dyn TransactionStore> = store.clone();
        let wallets: Arc<dyn WalletStore> = store;

        let recorder = Arc::new(StateRecorder::new(transactions.clone(), Arc::new(TxCache::new())));
        let custodian = Arc::new(KeyCustodian::new(wallets, master));
        let pipeline = Arc::new(SubmissionPipeline::new(
            config.submission.clone(),
            config.custody.auto_create_identities,
            recorder.clone(),
            custodian.clone(),
            gateway.clone(),
        ));
        let resubmitter = Resubmitter::new(
            pipeline.clone(),
            recorder.clone(),
            config.resubmit.clone(),
            config.tracker.concurrency,
        );
        let detector = Arc::new(PartitionDetector::new(
            gateway.clone(),
            config.nodes.partition_error_threshold,
            config.nodes.reset_repeat(),
        ));
        let tracker = Arc::new(Tracker::new(
            transactions.clone(),
            recorder.clone(),
            gateway.clone(),
            pipeline.clone(),
            resubmitter,
            detector.clone(),
            config.tracker.clone(),
        ));

        Self {
            config,
            store: transactions,
            recorder,
            custodian,
            gateway,
            registry,
            pipeline,
            detector,
            tracker,
        }
    }

    /// Validate and persist a request, then broadcast it in the background.
    ///
    /// Validation errors come back here; nothing after persistence does.
    pub async fn create_transaction(&self, request: TransactionRequest) -> ManagerResult<Transaction> {
        self.pipeline.create(request, Utc::now()).await
    }

    pub async fn get_transaction(&self, id: &str) -> ManagerResult<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> ManagerResult<Transaction> {
        self.store
            .get_by_hash(hash)
            .await?
            .ok_or_else(|| ManagerError::NotFound(hash.to_string()))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> ManagerResult<Page<Transaction>> {
        Ok(self.store.list(filter, page).await?)
    }

    /// Ordered audit log of one transaction.
    pub async fn get_events(&self, id: &str) -> ManagerResult<Vec<TransactionEvent>> {
        let events = self.store.events(id).await?;
        if events.is_empty() {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        Ok(events)
    }

    /// Start over from a `failed` or `expired` record. The new record links
    /// back through `retry_of`; the old one is left untouched.
    pub async fn retry(&self, id: &str) -> ManagerResult<Transaction> {
        let tx = self.get_transaction(id).await?;
        if !tx.status.is_retryable() {
            return Err(ManagerError::NotRetryable(tx.status));
        }

        tracing::info!(tx_id = %id, status = %tx.status, "Retrying transaction as new record");
        self.pipeline
            .create_linked(tx.to_request(), Some(tx.id.clone()), Utc::now())
            .await
    }

    /// Cancel a record that has not been included in a block yet.
    pub async fn cancel(&self, id: &str, reason: &str) -> ManagerResult<Transaction> {
        let tx = self.get_transaction(id).await?;
        if !tx.status.is_cancellable() {
            return Err(ManagerError::NotCancellable(tx.status));
        }

        let detail = serde_json::json!({ "reason": reason });
        let cancelled = self
            .recorder
            .transition(&tx, TxStatus::Cancelled, detail, Utc::now(), |next| {
                next.error = Some(format!("cancelled: {}", reason));
            })
            .await?;
        self.pipeline.forget(id);

        tracing::info!(tx_id = %id, from = %tx.status, reason, "Transaction cancelled");
        Ok(cancelled)
    }

    /// Signing identity of `service`, created on first request.
    pub async fn identity(&self, service: &str) -> ManagerResult<Identity> {
        Ok(self.custodian.create_identity(service, Utc::now()).await?)
    }

    /// Rebuild the Tracker's cache from the store.
    pub async fn recover(&self) -> ManagerResult<usize> {
        self.tracker.reload().await
    }

    /// Start the Tracker and Node Health Monitor loops.
    pub fn spawn(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let tracker = tokio::spawn(Arc::clone(&self.tracker).run(shutdown.subscribe()));

        let monitor = HealthMonitor::new(
            self.gateway.clone(),
            self.registry.clone(),
            self.config.nodes.probe_interval(),
            self.config.nodes.probe_timeout(),
        );
        let monitor = tokio::spawn(monitor.run(shutdown.subscribe()));

        vec![tracker, monitor]
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn pipeline(&self) -> &Arc<SubmissionPipeline> {
        &self.pipeline
    }

    pub fn detector(&self) -> &Arc<PartitionDetector> {
        &self.detector
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn custodian(&self) -> &Arc<KeyCustodian> {
        &self.custodian
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::store::MemoryStore;
    use crate::txn::OperationPayload;

    fn manager() -> (TransactionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = ManagerConfig::default();
        let registry = Arc::new(NodeRegistry::from_config(&config.nodes));
        let manager = TransactionManager::new(
            config,
            store.clone(),
            Arc::new(MockGateway::new()),
            registry,
            MasterKey::derive(b"manager-test").unwrap(),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.get_transaction("nope").await,
            Err(ManagerError::NotFound(_))
        ));
        assert!(matches!(
            manager.get_transaction_by_hash("0xdead").await,
            Err(ManagerError::NotFound(_))
        ));
        assert!(matches!(manager.get_events("nope").await, Err(ManagerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_retry_rejected_for_live_record() {
        let (manager, store) = manager();
        let tx = Transaction::new_created(
            TransactionRequest::new("oracle", OperationPayload::script("DAAUAQID")),
            None,
            Utc::now(),
        );
        let (tx, _) = manager.recorder.record_created(tx).await.unwrap();

        let err = manager.retry(&tx.id).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRetryable(TxStatus::Created)));
        assert_eq!(store.events(&tx.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_created_record() {
        let (manager, store) = manager();
        let tx = Transaction::new_created(
            TransactionRequest::new("oracle", OperationPayload::script("DAAUAQID")),
            None,
            Utc::now(),
        );
        let (tx, _) = manager.recorder.record_created(tx).await.unwrap();

        let cancelled = manager.cancel(&tx.id, "superseded").await.unwrap();
        assert_eq!(cancelled.status, TxStatus::Cancelled);

        let events = store.events(&tx.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].detail["reason"], "superseded");
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let (manager, _) = manager();
        let first = manager.identity("vrf").await.unwrap();
        let second = manager.identity("vrf").await.unwrap();
        assert_eq!(first.address, second.address);
    }
}
