//! Transaction lifecycle state machine.
//!
//! # States
//! ```text
//! created ──▶ submitted ──▶ pending ──▶ confirming ──▶ confirmed
//!    │           │  ▲          │  │          │
//!    │           └──┘ retry    │  └──────────┼──▶ confirmed (threshold already met)
//!    ▼           ▼             ▼             ▼
//! failed      expired    failed/expired    failed
//! cancelled (from created or pending)
//! ```
//!
//! # Design Decisions
//! - Terminal states have no outgoing edges, not even self-loops
//! - `submitted → submitted` is the only self-edge and records a rebroadcast
//! - Nothing ever re-enters `created`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Created,
    Submitted,
    Pending,
    Confirming,
    Confirmed,
    Failed,
    Expired,
    Cancelled,
}

impl TxStatus {
    /// All states, in lifecycle order.
    pub const ALL: [TxStatus; 8] = [
        TxStatus::Created,
        TxStatus::Submitted,
        TxStatus::Pending,
        TxStatus::Confirming,
        TxStatus::Confirmed,
        TxStatus::Failed,
        TxStatus::Expired,
        TxStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Created => "created",
            TxStatus::Submitted => "submitted",
            TxStatus::Pending => "pending",
            TxStatus::Confirming => "confirming",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Expired => "expired",
            TxStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions or retries.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Expired | TxStatus::Cancelled
        )
    }

    /// Whether `self → to` is a permitted edge.
    pub fn can_transition_to(&self, to: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, to),
            (Created, Submitted)
                | (Created, Failed)
                | (Created, Cancelled)
                | (Submitted, Submitted)
                | (Submitted, Pending)
                | (Submitted, Expired)
                | (Pending, Confirming)
                | (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Pending, Cancelled)
                | (Confirming, Confirmed)
                | (Confirming, Failed)
        )
    }

    /// Explicit cancellation is only accepted before the network has
    /// included the transaction in a block.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, TxStatus::Created | TxStatus::Pending)
    }

    /// Only dead records can be retried, and a retry is always a new record.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxStatus::Failed | TxStatus::Expired)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that a recorded sequence of states is a walk through the state
/// machine starting at `created`.
pub fn is_valid_path(statuses: &[TxStatus]) -> bool {
    match statuses.first() {
        Some(TxStatus::Created) => statuses
            .windows(2)
            .all(|pair| pair[0].can_transition_to(pair[1])),
        _ => false,
    }
}
