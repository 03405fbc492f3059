//! Node descriptor.
//!
//! # Responsibilities
//! - Represent a single network endpoint
//! - Track observed latency and consecutive failures
//! - Track the failure mark used to exclude the endpoint for a cooldown

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::resilience::elapsed;

/// A single endpoint behind the gateway. Runtime fields live only in memory
/// and reset on restart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor {
    pub url: Url,
    /// Relative preference among available endpoints.
    pub weight: u32,
    /// Last good round-trip latency.
    pub latency: Option<Duration>,
    /// Set while the endpoint is marked failed.
    pub failed_since: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl NodeDescriptor {
    pub fn new(url: Url, weight: u32) -> Self {
        Self {
            url,
            weight,
            latency: None,
            failed_since: None,
            consecutive_failures: 0,
        }
    }

    /// Selectable: never marked failed, or the cooldown has run out.
    pub fn is_available(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.failed_since {
            None => true,
            Some(since) => elapsed(since, now) >= cooldown,
        }
    }

    /// Report a successful call or probe.
    pub fn mark_success(&mut self, latency: Duration) {
        self.latency = Some(latency);
        self.failed_since = None;
        self.consecutive_failures = 0;
    }

    /// Report a failed call or probe. Returns true when this failure
    /// marked the node failed.
    pub fn mark_failure(&mut self, now: DateTime<Utc>, unhealthy_threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < unhealthy_threshold {
            return false;
        }
        // A node retried after its cooldown that fails again restarts the window.
        let newly_failed = self.failed_since.is_none();
        self.failed_since = Some(now);
        newly_failed
    }

    /// Forget all runtime state.
    pub fn reset(&mut self) {
        self.latency = None;
        self.failed_since = None;
        self.consecutive_failures = 0;
    }
}
