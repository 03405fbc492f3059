//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! External call (sign, broadcast, gateway query):
//!     → timeouts.rs (deadline; expiry becomes a transient error)
//!
//! Resubmission eligibility:
//!     → backoff.rs (minimum wait doubles with every rebroadcast)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry count is not bounded; the age ceiling is

pub mod backoff;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use timeouts::{elapsed, with_timeout};
