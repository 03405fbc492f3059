//! Transaction records, audit events, and caller requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::timeouts::elapsed;
use crate::txn::state::TxStatus;

/// Schema version of [`OperationPayload`] written by this build.
pub const PAYLOAD_SCHEMA_VERSION: u16 = 1;

fn default_schema_version() -> u16 {
    PAYLOAD_SCHEMA_VERSION
}

/// Reference to the entity that originated a transaction, e.g. `oracle_update:42`.
///
/// Only used by callers for cross-referencing; never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Self::new(kind, id)),
            _ => Err(format!("entity reference '{}' is not of the form kind:id", s)),
        }
    }
}

/// Caller-supplied operation descriptor.
///
/// Opaque to the core: only the originating service's own submission and
/// result-extraction code interprets `method`/`params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub signers: Vec<String>,
}

impl OperationPayload {
    pub fn script(script: impl Into<String>) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            script: script.into(),
            method: None,
            params: serde_json::Value::Null,
            signers: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>, params: serde_json::Value) -> Self {
        self.method = Some(method.into());
        self.params = params;
        self
    }
}

/// Declared fee parameters, in the chain's smallest fee unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub gas_price: u64,
    pub system_fee: u64,
    pub network_fee: u64,
}

/// A request to write something to the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub service: String,
    #[serde(default)]
    pub entity: Option<EntityRef>,
    pub payload: OperationPayload,
    #[serde(default)]
    pub fees: FeeParams,
    /// Deduplicates logically identical requests from the same service.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TransactionRequest {
    pub fn new(service: impl Into<String>, payload: OperationPayload) -> Self {
        Self {
            service: service.into(),
            entity: None,
            payload,
            fees: FeeParams::default(),
            idempotency_key: None,
        }
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_fees(mut self, fees: FeeParams) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// The central record. The store owns the authoritative copy; everything
/// else holds clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Network hash of the most recent accepted broadcast.
    pub hash: Option<String>,
    pub service: String,
    pub entity: Option<EntityRef>,
    pub idempotency_key: Option<String>,
    /// Failed or expired record this one retries.
    pub retry_of: Option<String>,
    pub payload: OperationPayload,
    pub fees: FeeParams,
    pub status: TxStatus,
    pub result: Option<serde_json::Value>,
    pub gas_consumed: Option<u64>,
    pub block_height: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub resubmit_count: u32,
    /// Set when a rebroadcast failed for good; no further rebroadcasts.
    #[serde(default)]
    pub halted: bool,
    /// First accepted broadcast; the age ceiling is measured from here.
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_broadcast_at: Option<DateTime<Utc>>,
    /// Incremented on every transition; equals the sequence of the latest event.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a fresh `created` record from a validated request.
    pub fn new_created(
        request: TransactionRequest,
        retry_of: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hash: None,
            service: request.service,
            entity: request.entity,
            idempotency_key: request.idempotency_key,
            retry_of,
            payload: request.payload,
            fees: request.fees,
            status: TxStatus::Created,
            result: None,
            gas_consumed: None,
            block_height: None,
            block_time: None,
            error: None,
            resubmit_count: 0,
            halted: false,
            submitted_at: None,
            last_broadcast_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time spent in flight, measured from the first accepted broadcast
    /// (or creation, if never accepted).
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.submitted_at.unwrap_or(self.created_at), now)
    }

    /// Time since the last broadcast attempt (or creation).
    pub fn since_last_broadcast(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.last_broadcast_at.unwrap_or(self.created_at), now)
    }

    /// Rebuild the request this record was created from, for retries.
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest {
            service: self.service.clone(),
            entity: self.entity.clone(),
            payload: self.payload.clone(),
            fees: self.fees,
            idempotency_key: None,
        }
    }
}

/// Append-only audit record, one per state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub tx_id: String,
    /// Position in this transaction's log, starting at 0 for `created`.
    pub sequence: u64,
    pub status: TxStatus,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl TransactionEvent {
    /// Event describing the state `tx` is now in.
    pub fn for_record(tx: &Transaction, detail: serde_json::Value) -> Self {
        Self {
            tx_id: tx.id.clone(),
            sequence: tx.revision,
            status: tx.status,
            detail,
            at: tx.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_format() {
        let entity = EntityRef::new("oracle_update", "42");
        assert_eq!(entity.to_string(), "oracle_update:42");
        assert_eq!("oracle_update:42".parse::<EntityRef>().unwrap(), entity);
        assert!("no-separator".parse::<EntityRef>().is_err());
        assert!(":42".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_new_created_record() {
        let now = Utc::now();
        let request = TransactionRequest::new("oracle", OperationPayload::script("AQID"))
            .with_entity(EntityRef::new("oracle_request", "7"))
            .with_idempotency_key("req-7");
        let tx = Transaction::new_created(request, None, now);

        assert_eq!(tx.status, TxStatus::Created);
        assert_eq!(tx.revision, 0);
        assert!(tx.hash.is_none());
        assert_eq!(tx.idempotency_key.as_deref(), Some("req-7"));
        assert_eq!(tx.age(now), Duration::ZERO);
    }

    #[test]
    fn test_age_uses_first_submission() {
        let now = Utc::now();
        let mut tx = Transaction::new_created(
            TransactionRequest::new("oracle", OperationPayload::script("AQID")),
            None,
            now - chrono::Duration::seconds(100),
        );
        tx.submitted_at = Some(now - chrono::Duration::seconds(40));
        tx.last_broadcast_at = Some(now - chrono::Duration::seconds(10));

        assert_eq!(tx.age(now), Duration::from_secs(40));
        assert_eq!(tx.since_last_broadcast(now), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_request_drops_idempotency_key() {
        let request = TransactionRequest::new("vrf", OperationPayload::script("AQID"))
            .with_idempotency_key("round-9");
        let tx = Transaction::new_created(request, None, Utc::now());
        let retry = tx.to_request();
        assert!(retry.idempotency_key.is_none());
        assert_eq!(retry.payload, tx.payload);
    }

    #[test]
    fn test_payload_defaults_schema_version() {
        let payload: OperationPayload = serde_json::from_str(r#"{"script":"AQID"}"#).unwrap();
        assert_eq!(payload.schema_version, PAYLOAD_SCHEMA_VERSION);
        assert!(payload.signers.is_empty());
    }
}
