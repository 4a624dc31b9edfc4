//! Caller-facing error type for stock and order operations.

use thiserror::Error;

use minierp_core::DomainError;

use crate::store::{StoreError, TransientKind};

/// Errors returned by the coordinator and the order service.
///
/// Only `Store(StoreError::Transient { .. })` is ever retried; everything
/// else is a business outcome or a hard failure and surfaces immediately.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule conflict, e.g. insufficient stock.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Transient failures persisted through every attempt. The transaction
    /// was rolled back each time, so nothing was applied.
    #[error("{operation} gave up after {attempts} attempts ({kind}): {message}")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
        kind: TransientKind,
        message: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl StockError {
    /// The retryable kind of this error, if any.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            StockError::Store(StoreError::Transient { kind, .. }) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient_kind().is_some()
    }
}

impl From<DomainError> for StockError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => StockError::Validation(msg),
            DomainError::InvariantViolation(msg) => StockError::InvariantViolation(msg),
            DomainError::NotFound(msg) => StockError::NotFound(msg),
            DomainError::Conflict(msg) => StockError::Conflict(msg),
        }
    }
}

impl From<StoreError> for StockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingReference(msg) => StockError::NotFound(msg),
            other => StockError::Store(other),
        }
    }
}
