//! Active endpoint probing.
//!
//! # Responsibilities
//! - Periodically probe every configured endpoint
//! - Feed latency or failure into the registry

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::gateway::ChainGateway;
use crate::nodes::registry::NodeRegistry;
use crate::resilience::with_timeout;

pub struct HealthMonitor {
    gateway: Arc<dyn ChainGateway>,
    registry: Arc<NodeRegistry>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        registry: Arc<NodeRegistry>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            interval,
            probe_timeout,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            endpoints = self.registry.len(),
            "Node health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Node health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every endpoint once. Returns how many answered.
    pub async fn check_all(&self) -> usize {
        let mut healthy_count = 0;

        for endpoint in self.registry.endpoints() {
            let probe = self.gateway.probe_health(&endpoint);
            match with_timeout(self.probe_timeout, probe).await {
                Ok(latency) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        latency_ms = latency.as_millis() as u64,
                        "Probe succeeded"
                    );
                    self.registry.record_success(&endpoint, latency);
                    healthy_count += 1;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "Probe failed");
                    self.registry.record_failure(&endpoint, Utc::now());
                }
            }
        }

        healthy_count
    }
}
