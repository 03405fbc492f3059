//! Crate-level error type and the failure taxonomy it maps onto.

use thiserror::Error;

use crate::custody::CustodyError;
use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::txn::state::TxStatus;

/// How an error should be treated by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request shape or fee ceiling; rejected synchronously.
    Validation,
    /// Missing identity or undecryptable key; fatal to the attempt.
    Signing,
    /// Timeouts and connection errors; absorbed as retry fodder.
    TransientNetwork,
    /// The chain refused or faulted the transaction; terminal.
    Execution,
    /// No usable endpoint at all.
    Systemic,
    NotFound,
    Conflict,
    InvalidState,
    Storage,
}

/// Errors surfaced by the transaction manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TxStatus, to: TxStatus },

    #[error("transaction in state {0} cannot be cancelled")]
    NotCancellable(TxStatus),

    #[error("transaction in state {0} cannot be retried")]
    NotRetryable(TxStatus),

    #[error("transaction {id} was updated concurrently (store holds {current})")]
    Conflict { id: String, current: TxStatus },

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::Validation(_) => ErrorKind::Validation,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::InvalidTransition { .. }
            | ManagerError::NotCancellable(_)
            | ManagerError::NotRetryable(_) => ErrorKind::InvalidState,
            ManagerError::Conflict { .. } => ErrorKind::Conflict,
            ManagerError::Custody(CustodyError::Store(_)) => ErrorKind::Storage,
            ManagerError::Custody(_) => ErrorKind::Signing,
            ManagerError::Gateway(GatewayError::NoEndpoints) => ErrorKind::Systemic,
            ManagerError::Gateway(e) if e.is_transient() => ErrorKind::TransientNetwork,
            ManagerError::Gateway(_) => ErrorKind::Execution,
            ManagerError::Store(_) => ErrorKind::Storage,
        }
    }

    /// Whether the failed attempt should end the record as `failed`
    /// rather than be picked up again later.
    pub fn is_fatal_to_attempt(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Signing | ErrorKind::Execution | ErrorKind::Validation
        )
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_kinds() {
        let err = ManagerError::Gateway(GatewayError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert!(!err.is_fatal_to_attempt());

        let err = ManagerError::Gateway(GatewayError::Rejected("insufficient funds".into()));
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.is_fatal_to_attempt());

        let err = ManagerError::Custody(CustodyError::IdentityNotFound("oracle".into()));
        assert_eq!(err.kind(), ErrorKind::Signing);
        assert!(err.is_fatal_to_attempt());

        let err = ManagerError::Gateway(GatewayError::NoEndpoints);
        assert_eq!(err.kind(), ErrorKind::Systemic);
    }

    #[test]
    fn test_error_display() {
        let err = ManagerError::NotCancellable(TxStatus::Confirming);
        assert_eq!(err.to_string(), "transaction in state confirming cannot be cancelled");
    }
}
