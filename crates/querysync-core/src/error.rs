use thiserror::Error;

use crate::key::FingerprintKey;

/// Failure reported by the external data source.
///
/// Opaque to the cache: it is stored on the entry and handed to every waiter
/// of the fetch that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        TransportError::Status {
            code,
            message: message.into(),
        }
    }

    /// HTTP-like status code when the transport reported one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Rejection before anything is dispatched. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Invalidation rule already registered for mutation '{0}'")]
    DuplicateRule(String),

    #[error("Operation name must not be empty")]
    EmptyOperation,

    #[error("Invalid payload: {0}")]
    Payload(String),
}

/// Two readers disagree on the value type cached under one key.
///
/// This is a programming error, never a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoalescingError {
    #[error("Key {key} holds {found}, requested as {expected}")]
    TypeMismatch {
        key: FingerprintKey,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Coalescing(#[from] CoalescingError),

    #[error("Operation aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
