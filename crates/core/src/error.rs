//! Errors shared by every crate: record rule violations and storage failures.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rule violations raised by records and their state machines.
///
/// Always deterministic: retrying the same request fails the same way.
/// Storage failures are reported through [`StoreError`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The status machine refused the requested change.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("a task may be linked to a lead or a customer, not both")]
    ConflictingLink,

    #[error("lead already converted")]
    AlreadyConverted,

    /// An id failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found")]
    NotFound,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Persistence error shared by every store port.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// A unique constraint rejected the write (e.g. duplicate email).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A conditional write matched zero rows.
    #[error("conditional update matched no rows: {0}")]
    ConditionFailed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
