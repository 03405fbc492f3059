//! Endpoint registry and selection.
//!
//! # Responsibilities
//! - Own the runtime state of every configured endpoint
//! - Rank endpoints for the next call
//! - Record passive (per call) and active (probe) health results
//!
//! # Design Decisions
//! - One lock-guarded structure, never process-global state
//! - Readers get cloned snapshots; no lock outlives a method call
//! - Availability dominates; weight then latency refine the order
//! - With nothing available, every node is tried, oldest failure first

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::time::Duration;
use url::Url;

use crate::config::NodesConfig;
use crate::nodes::node::NodeDescriptor;
use crate::observability::metrics;

#[derive(Debug)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeDescriptor>>,
    cooldown: Duration,
    unhealthy_threshold: u32,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<NodeDescriptor>, cooldown: Duration, unhealthy_threshold: u32) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            cooldown,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    pub fn from_config(config: &NodesConfig) -> Self {
        let nodes = config
            .endpoints
            .iter()
            .map(|e| NodeDescriptor::new(e.url.clone(), e.weight))
            .collect();
        Self::new(nodes, config.cooldown(), config.unhealthy_threshold)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Every configured endpoint, in configuration order.
    pub fn endpoints(&self) -> Vec<Url> {
        self.nodes.read().iter().map(|n| n.url.clone()).collect()
    }

    /// Copy of every descriptor.
    pub fn snapshot(&self) -> Vec<NodeDescriptor> {
        self.nodes.read().clone()
    }

    pub fn available_count(&self, now: DateTime<Utc>) -> usize {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_available(now, self.cooldown))
            .count()
    }

    /// Endpoints in the order they should be tried.
    pub fn ranked(&self, now: DateTime<Utc>) -> Vec<Url> {
        let nodes = self.nodes.read();

        let mut available: Vec<&NodeDescriptor> = nodes
            .iter()
            .filter(|n| n.is_available(now, self.cooldown))
            .collect();

        if !available.is_empty() {
            // Unknown latency sorts after any measured one.
            available.sort_by_key(|n| (Reverse(n.weight), n.latency.unwrap_or(Duration::MAX)));
            return available.into_iter().map(|n| n.url.clone()).collect();
        }

        let mut all: Vec<&NodeDescriptor> = nodes.iter().collect();
        all.sort_by_key(|n| n.failed_since);
        all.into_iter().map(|n| n.url.clone()).collect()
    }

    pub fn record_success(&self, url: &Url, latency: Duration) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.iter_mut().find(|n| &n.url == url) {
            let recovered = node.failed_since.is_some();
            node.mark_success(latency);
            if recovered {
                tracing::info!(endpoint = %url, latency_ms = latency.as_millis() as u64, "Endpoint recovered");
            }
            metrics::record_node_health(url.as_str(), true);
            metrics::record_node_latency(url.as_str(), latency);
        }
    }

    pub fn record_failure(&self, url: &Url, now: DateTime<Utc>) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.iter_mut().find(|n| &n.url == url) {
            if node.mark_failure(now, self.unhealthy_threshold) {
                tracing::warn!(
                    endpoint = %url,
                    failures = node.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Endpoint marked failed"
                );
                metrics::record_node_health(url.as_str(), false);
            }
        }
    }

    /// Clear all runtime state, as after a restart.
    pub fn reset(&self) {
        let mut nodes = self.nodes.write();
        for node in nodes.iter_mut() {
            node.reset();
        }
        tracing::info!(endpoints = nodes.len(), "Endpoint health state reset");
    }
}
