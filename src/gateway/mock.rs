//! Scriptable in-process gateway.
//!
//! Stands in for a real network in tests and local development: mempool
//! answers, receipts and failures are set by the caller, and every
//! broadcast and connection reset is counted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use url::Url;

use crate::custody::SignedPayload;
use crate::gateway::types::{ChainTransaction, GatewayError, GatewayResult, Receipt};
use crate::gateway::ChainGateway;

#[derive(Debug, Default)]
struct MockState {
    height: u64,
    /// Per-hash sticky mempool answers.
    mempool: HashMap<String, bool>,
    /// Answers consumed in call order when a hash has no sticky answer.
    mempool_script: VecDeque<bool>,
    receipts: HashMap<String, Receipt>,
    /// Every call fails with a transport error while set.
    failing: bool,
    broadcast_failures: VecDeque<GatewayError>,
    broadcasts: Vec<SignedPayload>,
    down: HashSet<Url>,
    mempool_queries: usize,
    resets: usize,
    probe_latency: Duration,
}

#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.state.lock().probe_latency = Duration::from_millis(5);
        gateway
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().height = height;
    }

    /// Fixed mempool answer for one hash.
    pub fn set_in_mempool(&self, hash: &str, present: bool) {
        self.state.lock().mempool.insert(hash.to_string(), present);
    }

    /// Queue mempool answers for hashes without a fixed answer. Once the
    /// queue is empty every such hash is reported absent.
    pub fn script_mempool(&self, answers: impl IntoIterator<Item = bool>) {
        self.state.lock().mempool_script.extend(answers);
    }

    pub fn set_receipt(&self, hash: &str, receipt: Receipt) {
        self.state.lock().receipts.insert(hash.to_string(), receipt);
    }

    pub fn clear_receipt(&self, hash: &str) {
        self.state.lock().receipts.remove(hash);
    }

    /// Make every call fail, as if no endpoint were reachable.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Fail the next broadcast(s) with `error`, once per queued error.
    pub fn fail_next_broadcast(&self, error: GatewayError) {
        self.state.lock().broadcast_failures.push_back(error);
    }

    /// Make probes of one endpoint fail.
    pub fn set_endpoint_down(&self, endpoint: &Url, down: bool) {
        let mut state = self.state.lock();
        if down {
            state.down.insert(endpoint.clone());
        } else {
            state.down.remove(endpoint);
        }
    }

    pub fn broadcasts(&self) -> Vec<SignedPayload> {
        self.state.lock().broadcasts.clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().broadcasts.len()
    }

    pub fn mempool_queries(&self) -> usize {
        self.state.lock().mempool_queries
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    fn check_failing(state: &MockState) -> GatewayResult<()> {
        if state.failing {
            return Err(GatewayError::Transport {
                endpoint: "mock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn current_height(&self) -> GatewayResult<u64> {
        let state = self.state.lock();
        Self::check_failing(&state)?;
        Ok(state.height)
    }

    async fn get_transaction(&self, hash: &str) -> GatewayResult<Option<ChainTransaction>> {
        let state = self.state.lock();
        Self::check_failing(&state)?;

        if let Some(receipt) = state.receipts.get(hash) {
            return Ok(Some(ChainTransaction {
                hash: hash.to_string(),
                block_height: Some(receipt.block_height),
                confirmations: receipt.confirmations,
            }));
        }
        let known = state.mempool.get(hash).copied().unwrap_or(false)
            || state.broadcasts.iter().any(|p| p.wire_hash() == hash);
        Ok(known.then(|| ChainTransaction {
            hash: hash.to_string(),
            block_height: None,
            confirmations: 0,
        }))
    }

    async fn get_receipt(&self, hash: &str) -> GatewayResult<Option<Receipt>> {
        let state = self.state.lock();
        Self::check_failing(&state)?;
        Ok(state.receipts.get(hash).cloned())
    }

    async fn is_in_mempool(&self, hash: &str) -> GatewayResult<bool> {
        let mut state = self.state.lock();
        Self::check_failing(&state)?;
        state.mempool_queries += 1;

        if let Some(present) = state.mempool.get(hash) {
            return Ok(*present);
        }
        Ok(state.mempool_script.pop_front().unwrap_or(false))
    }

    async fn broadcast(&self, payload: &SignedPayload) -> GatewayResult<String> {
        let mut state = self.state.lock();
        Self::check_failing(&state)?;
        if let Some(error) = state.broadcast_failures.pop_front() {
            return Err(error);
        }
        state.broadcasts.push(payload.clone());
        Ok(payload.wire_hash())
    }

    async fn probe_health(&self, endpoint: &Url) -> GatewayResult<Duration> {
        let state = self.state.lock();
        Self::check_failing(&state)?;
        if state.down.contains(endpoint) {
            return Err(GatewayError::Transport {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(state.probe_latency)
    }

    async fn reset_connections(&self) {
        self.state.lock().resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn payload() -> SignedPayload {
        SignedPayload {
            signer: Address::ZERO,
            message: b"tx".to_vec(),
            signature: vec![7; 65],
        }
    }

    #[tokio::test]
    async fn test_mempool_script_then_sticky() {
        let gateway = MockGateway::new();
        gateway.script_mempool([false, true]);
        assert!(!gateway.is_in_mempool("0xaa").await.unwrap());
        assert!(gateway.is_in_mempool("0xaa").await.unwrap());
        assert!(!gateway.is_in_mempool("0xaa").await.unwrap());

        gateway.set_in_mempool("0xaa", true);
        assert!(gateway.is_in_mempool("0xaa").await.unwrap());
        assert_eq!(gateway.mempool_queries(), 4);
    }

    #[tokio::test]
    async fn test_broadcast_failures_are_consumed() {
        let gateway = MockGateway::new();
        gateway.fail_next_broadcast(GatewayError::Timeout(Duration::from_secs(1)));

        assert!(gateway.broadcast(&payload()).await.is_err());
        let hash = gateway.broadcast(&payload()).await.unwrap();
        assert_eq!(hash, payload().wire_hash());
        assert_eq!(gateway.broadcast_count(), 1);

        let known = gateway.get_transaction(&hash).await.unwrap().unwrap();
        assert_eq!(known.block_height, None);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let gateway = MockGateway::new();
        gateway.set_failing(true);
        assert!(gateway.current_height().await.unwrap_err().is_transient());
        assert!(gateway.get_receipt("0xaa").await.is_err());

        gateway.set_failing(false);
        gateway.reset_connections().await;
        assert_eq!(gateway.reset_count(), 1);
    }
}
