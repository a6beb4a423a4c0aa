use thiserror::Error;

use stockbook_core::DomainError;

use crate::store::StoreError;

/// Error returned by every coordinator operation.
///
/// Domain errors come back unchanged; store failures are wrapped. Either way
/// the unit of work has been rolled back.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconciliationError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ReconciliationError::Domain(e) => Some(e),
            ReconciliationError::Store(_) => None,
        }
    }

    /// Retrying the same call may succeed (lock timeout, serialization
    /// failure, stale version).
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconciliationError::Domain(e) => !e.is_client_error(),
            ReconciliationError::Store(e) => e.is_transient(),
        }
    }
}
