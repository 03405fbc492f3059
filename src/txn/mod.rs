//! Transaction data model and state machine.
//!
//! # Data Flow
//! ```text
//! TransactionRequest (caller)
//!     → model.rs (Transaction record, created)
//!     → recorder.rs (store insert + event, cache write-through)
//!     → state.rs (every later move checked against permitted edges)
//!     → recorder.rs (store update + event, atomically)
//! ```
//!
//! # Design Decisions
//! - The store owns records; caches and callers hold clones
//! - One event per transition, committed with the record update
//! - `revision` doubles as event sequence and optimistic lock

pub mod error;
pub mod model;
pub mod recorder;
pub mod state;

pub use error::{ErrorKind, ManagerError, ManagerResult};
pub use model::{
    EntityRef, FeeParams, OperationPayload, Transaction, TransactionEvent, TransactionRequest,
};
pub use recorder::StateRecorder;
pub use state::TxStatus;
