//! Partition detection.
//!
//! Many gateway errors inside a single Tracker tick, with work in flight,
//! point at the connection layer rather than at individual transactions.
//! The detector escalates that into one hard reset of all cached connection
//! state, then stays quiet until a tick at or below the threshold. An
//! optional repeat interval allows one more reset per interval of a
//! continuous outage; it is off unless configured.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::ChainGateway;
use crate::observability::metrics;
use crate::resilience::elapsed;

#[derive(Debug)]
struct DetectorState {
    armed: bool,
    last_reset: Option<DateTime<Utc>>,
    resets: u64,
}

pub struct PartitionDetector {
    gateway: Arc<dyn ChainGateway>,
    threshold: usize,
    repeat_after: Option<Duration>,
    state: Mutex<DetectorState>,
}

impl PartitionDetector {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        threshold: usize,
        repeat_after: Option<Duration>,
    ) -> Self {
        Self {
            gateway,
            threshold,
            repeat_after,
            state: Mutex::new(DetectorState {
                armed: true,
                last_reset: None,
                resets: 0,
            }),
        }
    }

    /// Decide whether this tick calls for a reset. Pure bookkeeping; see
    /// [`PartitionDetector::observe`] for the version that acts on it.
    pub fn should_reset(&self, errors: usize, open: usize, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();

        if !state.armed {
            let repeat_due = match (self.repeat_after, state.last_reset) {
                (Some(interval), Some(at)) => elapsed(at, now) >= interval,
                _ => false,
            };
            if errors <= self.threshold || repeat_due {
                state.armed = true;
            }
        }

        if errors > self.threshold && open > 0 && state.armed {
            state.armed = false;
            state.last_reset = Some(now);
            state.resets += 1;
            return true;
        }
        false
    }

    /// Feed one tick's error count; resets every connection when the
    /// pattern looks systemic. Returns whether a reset happened.
    pub async fn observe(&self, errors: usize, open: usize, now: DateTime<Utc>) -> bool {
        if !self.should_reset(errors, open, now) {
            return false;
        }

        tracing::warn!(
            errors,
            open,
            threshold = self.threshold,
            "Systemic gateway failure detected, resetting all connections"
        );
        self.gateway.reset_connections().await;
        metrics::record_connection_reset();
        true
    }

    /// Resets triggered since startup.
    pub fn resets(&self) -> u64 {
        self.state.lock().resets
    }
}
