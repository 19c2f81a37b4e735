//! Structured error types for ratchet.
//!
//! `RatchetError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` ever crosses the crate boundary bare.**
//!
//! - `anyhow` is internal transport (ergonomic for coordinator backends,
//!   cursor stores, and user hooks)
//! - `RatchetError` is the only externalized error, and wraps transport
//!   errors at the boundary (`Coordinator`, `Store`, `Callback`)
//!
//! Two outcomes are deliberately *not* errors: admission rejection
//! (backpressure) and a terminal cursor observed inside `consume`. Both are
//! reported through [`ConsumeOutcome`](crate::ConsumeOutcome) instead.

use std::time::Duration;

use thiserror::Error;

/// Structured error type for indexer operations.
///
/// Each variant includes context about what went wrong, so callers can
/// pattern match on failure modes instead of string-matching messages.
#[derive(Debug, Error)]
pub enum RatchetError {
    /// The terminal predicate was true at claim time.
    ///
    /// Surfaced by `atomic()`; swallowed by `consume()` (which reports
    /// `ConsumeOutcome::ReachedLatest` instead). The cursor is not mutated.
    #[error("cursor reached its terminal value at {cursor}")]
    ReachedLatest {
        /// The canonical encoding of the cursor value at the boundary.
        cursor: String,
    },

    /// The indexer is missing something an operation requires: a coordinator
    /// for coordinated ops, an initial value on first read, or a step
    /// function at build time.
    #[error("misconfigured indexer: {0}")]
    Misconfiguration(String),

    /// The cursor lock could not be acquired within its wait budget.
    #[error("could not acquire lock {key} within {waited:?}")]
    LockUnavailable {
        /// The lock key that was contended.
        key: String,
        /// How long we waited before giving up.
        waited: Duration,
    },

    /// A user hook raised an error: the consume callback, or `on_rollback`
    /// (which aborts the rollback before anything is mutated).
    #[error("callback failed: {0}")]
    Callback(#[source] anyhow::Error),

    /// Wire-level failure against the shared coordinator, surfaced unchanged.
    #[error("coordinator operation failed: {0}")]
    Coordinator(#[source] anyhow::Error),

    /// Failure against the cursor store, surfaced unchanged.
    #[error("cursor store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    /// A cursor value could not be round-tripped through its canonical
    /// encoding.
    #[error("cursor value could not be encoded or decoded: {0}")]
    Codec(#[source] serde_json::Error),
}

impl RatchetError {
    /// Returns true for the terminal-predicate failure mode.
    pub fn is_reached_latest(&self) -> bool {
        matches!(self, RatchetError::ReachedLatest { .. })
    }

    /// Returns true when the error originated in user code rather than in
    /// the engine or its backends.
    pub fn is_callback(&self) -> bool {
        matches!(self, RatchetError::Callback(_))
    }
}
