//! Node Health Monitor subsystem.
//!
//! # Data Flow
//! ```text
//! Active checks (monitor.rs):
//!     Periodic timer
//!     → ChainGateway::probe_health per endpoint
//!     → registry.rs (latency or failure mark)
//!
//! Passive checks (gateway):
//!     Every RPC call
//!     → registry.rs (success/latency or failure)
//!
//! Partition detection (partition.rs):
//!     Tracker tick error count
//!     → threshold exceeded with open transactions
//!     → ChainGateway::reset_connections (once per outage)
//! ```
//!
//! # Design Decisions
//! - Health state is per endpoint, owned by the registry, in memory only
//! - Failure marks require consecutive failures to prevent flapping
//! - Failed endpoints are retried after a cooldown

pub mod monitor;
pub mod node;
pub mod partition;
pub mod registry;

pub use monitor::HealthMonitor;
pub use node::NodeDescriptor;
pub use partition::PartitionDetector;
pub use registry::NodeRegistry;
