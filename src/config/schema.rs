//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! transaction manager. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root configuration for the transaction manager.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Request validation and first-broadcast settings.
    pub submission: SubmissionConfig,

    /// Tracker loop cadence and confirmation policy.
    pub tracker: TrackerConfig,

    /// Rebroadcast backoff.
    pub resubmit: ResubmitConfig,

    /// Network endpoints, health probing and partition detection.
    pub nodes: NodesConfig,

    /// JSON-RPC transport settings.
    pub gateway: GatewayConfig,

    /// Key custody settings.
    pub custody: CustodyConfig,

    /// Record store settings.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Submission pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Services allowed to submit transactions.
    pub services: Vec<String>,

    /// Exclusive ceiling on the declared gas price.
    pub max_gas_price: u64,

    /// Exclusive ceiling on the declared system fee.
    pub max_system_fee: u64,

    /// Exclusive ceiling on the declared network fee.
    pub max_network_fee: u64,

    /// Maximum script length, in characters.
    pub max_script_len: usize,

    /// Maximum idempotency key length.
    pub max_idempotency_key_len: usize,

    /// Deadline for one sign call in seconds.
    pub sign_timeout_secs: u64,

    /// Deadline for one broadcast call in seconds.
    pub broadcast_timeout_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            services: vec![
                "oracle".to_string(),
                "datafeed".to_string(),
                "vrf".to_string(),
                "automation".to_string(),
            ],
            max_gas_price: 1_000_000_000,
            max_system_fee: 100_000_000_000,
            max_network_fee: 10_000_000_000,
            max_script_len: 65_536,
            max_idempotency_key_len: 128,
            sign_timeout_secs: 5,
            broadcast_timeout_secs: 10,
        }
    }
}

impl SubmissionConfig {
    pub fn sign_timeout(&self) -> Duration {
        Duration::from_secs(self.sign_timeout_secs)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_secs)
    }

    pub fn is_known_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Tick interval in seconds.
    pub interval_secs: u64,

    /// Full cache reload interval in seconds.
    pub reload_interval_secs: u64,

    /// Confirmations required before a transaction is `confirmed`.
    pub required_confirmations: u64,

    /// Deadline for one gateway query in seconds.
    pub query_timeout_secs: u64,

    /// Age ceiling in seconds; older unresolved transactions expire.
    pub max_pending_age_secs: u64,

    /// Maximum concurrent gateway queries per tick.
    pub concurrency: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            reload_interval_secs: 120,
            required_confirmations: 3,
            query_timeout_secs: 10,
            max_pending_age_secs: 3600,
            concurrency: 16,
        }
    }
}

impl TrackerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn max_pending_age(&self) -> Duration {
        Duration::from_secs(self.max_pending_age_secs)
    }
}

/// Resubmission configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResubmitConfig {
    /// Minimum wait in seconds since the last broadcast before the first
    /// rebroadcast. Doubles after each rebroadcast.
    pub resubmit_after_secs: u64,

    /// Cap on the doubled wait, in seconds.
    pub max_backoff_secs: u64,
}

impl Default for ResubmitConfig {
    fn default() -> Self {
        Self {
            resubmit_after_secs: 60,
            max_backoff_secs: 960,
        }
    }
}

impl ResubmitConfig {
    pub fn resubmit_after(&self) -> Duration {
        Duration::from_secs(self.resubmit_after_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// One network endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EndpointConfig {
    pub url: Url,

    /// Relative preference among available endpoints (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

const DEFAULT_ENDPOINT: &str = "http://localhost:10332";

/// Node health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodesConfig {
    pub endpoints: Vec<EndpointConfig>,

    /// Probe interval in seconds.
    pub probe_interval_secs: u64,

    /// Probe timeout in seconds.
    pub probe_timeout_secs: u64,

    /// How long a failed endpoint is excluded, in seconds.
    pub cooldown_secs: u64,

    /// Consecutive failures before an endpoint is marked failed.
    pub unhealthy_threshold: u32,

    /// Gateway errors in one tick above which a connection reset fires.
    pub partition_error_threshold: usize,

    /// Allow another reset after this many seconds of one continuous
    /// outage. Unset: one reset per outage, re-armed only by a healthy tick.
    pub reset_repeat_secs: Option<u64>,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            endpoints: Url::parse(DEFAULT_ENDPOINT)
                .map(|url| EndpointConfig { url, weight: 1 })
                .into_iter()
                .collect(),
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            cooldown_secs: 60,
            unhealthy_threshold: 3,
            partition_error_threshold: 5,
            reset_repeat_secs: None,
        }
    }
}

impl NodesConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn reset_repeat(&self) -> Option<Duration> {
        self.reset_repeat_secs.map(Duration::from_secs)
    }
}

/// JSON-RPC gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Idle pooled connections kept per endpoint.
    pub pool_max_idle_per_host: usize,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            user_agent: concat!("tx-manager/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Key custody configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Environment variable holding the master secret. The secret itself
    /// is never read from the config file.
    pub master_secret_env: String,

    /// Create a signing identity on first use of an allowed service.
    pub auto_create_identities: bool,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            master_secret_env: "TX_MANAGER_MASTER_KEY".to_string(),
            auto_create_identities: true,
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database, e.g. `sqlite://tx-manager.db`. Created if missing.
    pub database_url: String,

    /// Connection pool size.
    pub max_connections: u32,

    /// How long a writer waits on a locked database, in seconds.
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tx-manager.db".to_string(),
            max_connections: 4,
            busy_timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}
