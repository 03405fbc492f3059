//! Transaction Tracker.
//!
//! # Data Flow
//! ```text
//! store (list_open, every reload interval)
//!     → cache.rs (open records, written through by every transition)
//!     → tick.rs (snapshot per tick, gateway queries, transitions)
//!     → Resubmitter (due rebroadcasts and resumes)
//!     → PartitionDetector (network error count for the tick)
//! ```

pub mod cache;
pub mod tick;

pub use cache::TxCache;
pub use tick::{TickReport, Tracker};
