//! Submission Pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionRequest
//!     → validation.rs (service allow-list, script, fee ceilings)
//!     → StateRecorder (created record + event)      ← caller returns here
//!     → submitter.rs, detached task:
//!         KeyCustodian::sign → ChainGateway::broadcast
//!         → submitted (hash) | failed (error) | created (transient, resumed later)
//! ```

pub mod submitter;
pub mod validation;

pub use submitter::{signing_message, InFlightGuard, SubmissionPipeline};
pub use validation::validate_request;
