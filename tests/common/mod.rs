//! Shared harness for integration tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use tx_manager::config::ManagerConfig;
use tx_manager::custody::MasterKey;
use tx_manager::gateway::Receipt;
use tx_manager::nodes::NodeRegistry;
use tx_manager::txn::OperationPayload;
use tx_manager::store::{TransactionStore, WalletStore};
use tx_manager::{MemoryStore, MockGateway, Transaction, TransactionManager, TransactionRequest, TxStatus};

pub const MASTER_SECRET: &[u8] = b"integration-test-master-secret";

pub struct TestContext {
    pub manager: TransactionManager,
    pub gateway: Arc<MockGateway>,
}

/// Short timings so scenarios fit in a handful of ticks.
pub fn test_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.tracker.required_confirmations = 3;
    config.tracker.max_pending_age_secs = 600;
    config.resubmit.resubmit_after_secs = 30;
    config.resubmit.max_backoff_secs = 240;
    config.nodes.partition_error_threshold = 5;
    config.observability.metrics_enabled = false;
    config
}

pub fn context() -> TestContext {
    context_with_store(Arc::new(MemoryStore::new()))
}

#[allow(dead_code)]
pub fn context_with_store<S>(store: Arc<S>) -> TestContext
where
    S: TransactionStore + WalletStore + 'static,
{
    let config = test_config();
    let gateway = Arc::new(MockGateway::new());
    let registry = Arc::new(NodeRegistry::from_config(&config.nodes));
    let manager = TransactionManager::new(
        config,
        store,
        gateway.clone(),
        registry,
        MasterKey::derive(MASTER_SECRET).unwrap(),
    );
    TestContext { manager, gateway }
}

pub fn request(service: &str) -> TransactionRequest {
    TransactionRequest::new(
        service,
        OperationPayload::script("DAAUAQID").with_method(
            "updatePrice",
            serde_json::json!({ "pair": "NEO/USD", "price": "1234500" }),
        ),
    )
}

pub fn receipt(confirmations: u64) -> Receipt {
    Receipt {
        confirmations,
        block_height: 4_200_000,
        block_time: Some(Utc::now()),
        gas_consumed: 1_048_576,
        result: serde_json::json!([{ "type": "Boolean", "value": true }]),
        fault: None,
    }
}

/// Poll until the record reaches `status`. The first broadcast runs on a
/// detached task, so tests wait for it rather than assume it finished.
pub async fn wait_for_status(ctx: &TestContext, id: &str, status: TxStatus) -> Transaction {
    for _ in 0..300 {
        let tx = ctx.manager.get_transaction(id).await.unwrap();
        if tx.status == status {
            return tx;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transaction {} never reached {}", id, status);
}

/// Create a transaction and wait for its first broadcast.
pub async fn submitted(ctx: &TestContext, service: &str) -> Transaction {
    let tx = ctx.manager.create_transaction(request(service)).await.unwrap();
    wait_for_status(ctx, &tx.id, TxStatus::Submitted).await
}

#[allow(dead_code)]
pub fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}
