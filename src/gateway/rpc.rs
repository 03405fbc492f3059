//! JSON-RPC gateway with endpoint failover.
//!
//! # Responsibilities
//! - Speak JSON-RPC 2.0 over HTTP to the configured node endpoints
//! - Walk endpoints in registry order until one answers
//! - Report per-call success/latency or failure to the registry
//! - Drop pooled connections on request

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::GatewayConfig;
use crate::custody::SignedPayload;
use crate::gateway::types::{ChainTransaction, GatewayError, GatewayResult, Receipt};
use crate::gateway::ChainGateway;
use crate::nodes::NodeRegistry;
use crate::observability::metrics;
use crate::resilience::with_timeout;

/// Node error code for a hash it has never seen.
const UNKNOWN_TRANSACTION: i64 = -100;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Chain gateway backed by one or more JSON-RPC nodes.
pub struct RpcGateway {
    /// Rebuilt on reset; cloned out before every request.
    client: RwLock<reqwest::Client>,
    registry: Arc<NodeRegistry>,
    config: GatewayConfig,
    next_id: AtomicU64,
}

impl RpcGateway {
    pub fn new(config: GatewayConfig, registry: Arc<NodeRegistry>) -> GatewayResult<Self> {
        let client = build_client(&config)?;
        tracing::info!(
            endpoints = registry.len(),
            timeout_secs = config.rpc_timeout_secs,
            "RPC gateway initialized"
        );
        Ok(Self {
            client: RwLock::new(client),
            registry,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Call `method` on the first endpoint that answers.
    async fn call(&self, method: &str, params: Value) -> GatewayResult<Value> {
        let endpoints = self.registry.ranked(Utc::now());
        if endpoints.is_empty() {
            return Err(GatewayError::NoEndpoints);
        }

        let mut failures = Vec::with_capacity(endpoints.len());
        for (i, endpoint) in endpoints.iter().enumerate() {
            let started = Instant::now();
            match self.call_endpoint(endpoint, method, &params).await {
                Ok(value) => {
                    self.registry.record_success(endpoint, started.elapsed());
                    return Ok(value);
                }
                // The node answered; the error is about the request.
                Err(e @ GatewayError::Rpc { .. }) => {
                    self.registry.record_success(endpoint, started.elapsed());
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint_idx = i,
                        endpoint = %endpoint,
                        method,
                        error = %e,
                        "RPC call failed, trying next endpoint"
                    );
                    self.registry.record_failure(endpoint, Utc::now());
                    failures.push(e.to_string());
                }
            }
        }

        metrics::record_gateway_error(method);
        Err(GatewayError::Exhausted(format!(
            "{} for {} endpoint(s): {}",
            method,
            endpoints.len(),
            failures.join("; ")
        )))
    }

    async fn call_endpoint(&self, endpoint: &Url, method: &str, params: &Value) -> GatewayResult<Value> {
        let client = self.client.read().clone();
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let limit = self.config.rpc_timeout();

        let exchange = async {
            let response = client
                .post(endpoint.clone())
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error(endpoint, limit, e))?;
            if !response.status().is_success() {
                return Err(GatewayError::Transport {
                    endpoint: endpoint.to_string(),
                    message: format!("http status {}", response.status()),
                });
            }
            response
                .json::<RpcResponse>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))
        };

        let response = with_timeout(limit, exchange).await?;
        if let Some(error) = response.error {
            return Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| GatewayError::Decode(format!("{} returned no result", method)))
    }

    /// `getrawtransaction` in verbose form; `None` for unknown hashes.
    async fn raw_transaction(&self, hash: &str) -> GatewayResult<Option<Value>> {
        match self.call("getrawtransaction", json!([hash, true])).await {
            Ok(value) => Ok(Some(value)),
            Err(GatewayError::Rpc { code, .. }) if code == UNKNOWN_TRANSACTION => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    async fn current_height(&self) -> GatewayResult<u64> {
        let count = self.call("getblockcount", json!([])).await?;
        let count = count
            .as_u64()
            .ok_or_else(|| GatewayError::Decode(format!("block count {} is not a number", count)))?;
        // Block count includes the genesis block.
        Ok(count.saturating_sub(1))
    }

    async fn get_transaction(&self, hash: &str) -> GatewayResult<Option<ChainTransaction>> {
        let Some(raw) = self.raw_transaction(hash).await? else {
            return Ok(None);
        };
        let confirmations = raw.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
        let block_height = if raw.get("blockhash").is_some() {
            Some(self.call("gettransactionheight", json!([hash])).await.and_then(as_u64)?)
        } else {
            None
        };
        Ok(Some(ChainTransaction {
            hash: hash.to_string(),
            block_height,
            confirmations,
        }))
    }

    async fn get_receipt(&self, hash: &str) -> GatewayResult<Option<Receipt>> {
        let Some(raw) = self.raw_transaction(hash).await? else {
            return Ok(None);
        };
        if raw.get("blockhash").is_none() {
            return Ok(None);
        }

        let block_height = self
            .call("gettransactionheight", json!([hash]))
            .await
            .and_then(as_u64)?;
        let log = self.call("getapplicationlog", json!([hash])).await?;
        parse_receipt(&raw, &log, block_height).map(Some)
    }

    async fn is_in_mempool(&self, hash: &str) -> GatewayResult<bool> {
        let pool = self.call("getrawmempool", json!([])).await?;
        let pool: Vec<String> =
            serde_json::from_value(pool).map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(pool.iter().any(|h| same_hash(h, hash)))
    }

    async fn broadcast(&self, payload: &SignedPayload) -> GatewayResult<String> {
        match self.call("sendrawtransaction", json!([payload.to_wire()])).await {
            Ok(value) => Ok(value
                .get("hash")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| payload.wire_hash())),
            // A rebroadcast of bytes the network already holds.
            Err(GatewayError::Rpc { message, .. }) if is_already_known(&message) => {
                Ok(payload.wire_hash())
            }
            Err(GatewayError::Rpc { code, message }) => {
                Err(GatewayError::Rejected(format!("{} ({})", message, code)))
            }
            Err(e) => Err(e),
        }
    }

    async fn probe_health(&self, endpoint: &Url) -> GatewayResult<Duration> {
        let started = Instant::now();
        self.call_endpoint(endpoint, "getblockcount", &json!([])).await?;
        Ok(started.elapsed())
    }

    async fn reset_connections(&self) {
        match build_client(&self.config) {
            Ok(client) => *self.client.write() = client,
            Err(e) => tracing::error!(error = %e, "Failed to rebuild HTTP client, keeping the old one"),
        }
        self.registry.reset();
        tracing::warn!("RPC connections reset");
    }
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway")
            .field("endpoints", &self.registry.endpoints())
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

fn build_client(config: &GatewayConfig) -> GatewayResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.rpc_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| GatewayError::Transport {
            endpoint: "client".to_string(),
            message: e.to_string(),
        })
}

fn transport_error(endpoint: &Url, limit: Duration, e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(limit)
    } else {
        GatewayError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        }
    }
}

fn as_u64(value: Value) -> GatewayResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| GatewayError::Decode(format!("expected integer, got {}", value)))
}

fn same_hash(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x").eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("alreadyexists") || message.contains("already exists")
}

/// Build a receipt from a verbose transaction and its application log.
fn parse_receipt(raw: &Value, log: &Value, block_height: u64) -> GatewayResult<Receipt> {
    let confirmations = raw.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
    let block_time = raw
        .get("blocktime")
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let execution = log
        .get("executions")
        .and_then(Value::as_array)
        .and_then(|executions| executions.first())
        .ok_or_else(|| GatewayError::Decode("application log has no executions".to_string()))?;

    let vm_state = execution
        .get("vmstate")
        .and_then(Value::as_str)
        .unwrap_or_default();
    // Gas is reported as a decimal string of fractional units.
    let gas_consumed = match execution.get("gasconsumed") {
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|e| GatewayError::Decode(format!("gasconsumed '{}': {}", s, e)))?,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    };
    let fault = if vm_state.contains("FAULT") {
        Some(
            execution
                .get("exception")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("execution faulted")
                .to_string(),
        )
    } else {
        None
    };

    Ok(Receipt {
        confirmations,
        block_height,
        block_time,
        gas_consumed,
        result: execution.get("stack").cloned().unwrap_or(Value::Null),
        fault,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeDescriptor;

    fn gateway(endpoints: &[&str]) -> RpcGateway {
        let nodes = endpoints
            .iter()
            .map(|e| NodeDescriptor::new(e.parse().unwrap(), 1))
            .collect();
        let registry = Arc::new(NodeRegistry::new(nodes, Duration::from_secs(60), 1));
        let config = GatewayConfig {
            rpc_timeout_secs: 2,
            ..Default::default()
        };
        RpcGateway::new(config, registry).unwrap()
    }

    #[test]
    fn test_parse_halt_receipt() {
        let raw = json!({"hash": "0xab", "blockhash": "0xcd", "confirmations": 4, "blocktime": 1_700_000_000_000i64});
        let log = json!({"executions": [{"vmstate": "HALT", "gasconsumed": "997775", "exception": null, "stack": [{"type": "Integer", "value": "1"}]}]});

        let receipt = parse_receipt(&raw, &log, 1200).unwrap();
        assert_eq!(receipt.confirmations, 4);
        assert_eq!(receipt.block_height, 1200);
        assert_eq!(receipt.gas_consumed, 997_775);
        assert!(receipt.block_time.is_some());
        assert!(!receipt.is_fault());
        assert_eq!(receipt.result[0]["value"], "1");
    }

    #[test]
    fn test_parse_fault_receipt() {
        let raw = json!({"blockhash": "0xcd", "confirmations": 1});
        let log = json!({"executions": [{"vmstate": "FAULT", "gasconsumed": "100", "exception": "ABORT is executed"}]});

        let receipt = parse_receipt(&raw, &log, 7).unwrap();
        assert_eq!(receipt.fault.as_deref(), Some("ABORT is executed"));

        let empty = json!({"executions": []});
        assert!(matches!(parse_receipt(&raw, &empty, 7), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn test_hash_helpers() {
        assert!(same_hash("0xABcd", "abcd"));
        assert!(!same_hash("0xabce", "0xabcd"));
        assert!(is_already_known("AlreadyExists"));
        assert!(is_already_known("Block or transaction already exists"));
        assert!(!is_already_known("InsufficientFunds"));
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let gateway = gateway(&[]);
        assert!(matches!(gateway.current_height().await, Err(GatewayError::NoEndpoints)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_exhausted() {
        // Nothing listens on port 1; both endpoints refuse.
        let gateway = gateway(&["http://127.0.0.1:1", "http://127.0.0.1:2"]);
        let result = gateway.current_height().await;
        assert!(matches!(result, Err(GatewayError::Exhausted(_))));
        assert!(result.unwrap_err().is_transient());
        assert_eq!(gateway.registry().available_count(Utc::now()), 0);

        gateway.reset_connections().await;
        assert_eq!(gateway.registry().available_count(Utc::now()), 2);
    }
}
