//! Resubmitter subsystem.
//!
//! # Data Flow
//! ```text
//! Tracker tick
//!     → mempool / receipt checks (nothing seen on chain)
//!     → resubmitter.rs is_due (backoff since last broadcast)
//!     → ResubmitCandidate list
//!     → resubmitter.rs process_at
//!         Rebroadcast: sign + broadcast again, submitted → submitted event
//!         Resume: first broadcast through the pipeline
//! ```

pub mod resubmitter;

pub use resubmitter::{CandidateKind, ResubmitCandidate, ResubmitReport, Resubmitter};
