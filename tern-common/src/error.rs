//! Shared error model for cross-crate APIs.

use thiserror::Error;

use crate::ids::SlotId;

/// Unified result type used by all public interfaces in `tern`.
pub type TernResult<T> = Result<T, TernError>;

/// High-level error categories surfaced at API boundaries.
///
/// Programming and invariant violations (a corrupted wait-for graph, releasing an un-ready
/// transaction) are not represented here: those abort the process instead of propagating.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TernError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Transaction payload is malformed or semantically invalid.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),

    /// An ordered-log position was inserted twice.
    #[error("log position {0} has already been taken")]
    DuplicateLogPosition(SlotId),

    /// The next ordered-log position has not arrived yet.
    #[error("next log entry does not exist")]
    NoNextLogEntry,

    /// An inter-module channel was closed on the other side.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}
