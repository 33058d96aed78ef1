//! Shared error type for the fleetd crates.

use derive_more::Display;
use std::fmt;
use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of fleetd errors.
///
/// This list is intended to grow over time and it is not recommended to
/// exhaustively match against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// Malformed input bytes or an inconsistent parsed document.
    InvalidSchema,
    /// A scheme references a signal absent from the decoder manifest.
    UnresolvedSignal,
    /// An expression tree exceeds the configured maximum depth.
    ExpressionTooDeep,
    /// A bounded queue rejected a push.
    QueueFull,
    /// The persistence layer failed; non-fatal for the caller.
    PersistenceIo,
    /// A required collaborator was not installed before start.
    NotConfigured,
    /// The operation was interrupted by shutdown.
    Cancelled,
}

/// The error type returned by fallible fleetd operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("signal {signal_id} is not defined in decoder manifest {manifest_id}")]
    UnresolvedSignal { signal_id: u32, manifest_id: String },

    #[error("expression tree exceeds the maximum depth of {max_depth}")]
    ExpressionTooDeep { max_depth: u32 },

    #[error("queue `{0}` is full")]
    QueueFull(&'static str),

    #[error("persistence failure: {0}")]
    PersistenceIo(#[from] std::io::Error),

    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidSchema(_) => ErrorKind::InvalidSchema,
            Error::UnresolvedSignal { .. } => ErrorKind::UnresolvedSignal,
            Error::ExpressionTooDeep { .. } => ErrorKind::ExpressionTooDeep,
            Error::QueueFull(_) => ErrorKind::QueueFull,
            Error::PersistenceIo(_) => ErrorKind::PersistenceIo,
            Error::NotConfigured(_) => ErrorKind::NotConfigured,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Creates an `InvalidSchema` error from any displayable reason.
    pub fn invalid_schema<T: fmt::Display>(reason: T) -> Self {
        Error::InvalidSchema(reason.to_string())
    }
}
