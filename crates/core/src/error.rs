//! Domain error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, state transitions). Storage failures belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, non-positive amount).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A stock movement would drive a product's stock below zero.
    #[error(
        "insufficient stock for product {product_id}: available {available}, requested change {delta}"
    )]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        delta: i64,
    },

    /// A purchase receipt exceeds the line's remaining ordered quantity.
    #[error("over-receipt on line {line_no}: remaining {remaining}, attempted {attempted}")]
    OverReceipt {
        line_no: u32,
        remaining: i64,
        attempted: i64,
    },

    /// A state change was attempted from a state that forbids it.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced product, purchase order or order does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (duplicate business key, stale version).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Client errors are never retried automatically by callers.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DomainError::Conflict(_))
    }
}
