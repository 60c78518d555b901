//! Error taxonomy for the GMU transactional core
//!
//! Failures are propagated as typed errors, never exceptions. Each variant's
//! doc comment records who raises it and the recovery policy.
//!
//! `thiserror` gives us `Display`/`std::error::Error` without hand-rolled
//! boilerplate, matching the rest of this workspace's crates.

use thiserror::Error;

/// Result alias used throughout the GMU core.
pub type GmuResult<T> = std::result::Result<T, GmuError>;

/// The error kinds raised across the commit log, queue, commit manager, and
/// entry-wrapping protocol.
///
/// Recovery is local; the core never retries internally. Callers decide
/// whether `Timeout`/`Interrupted` warrant a retry of the whole transaction.
#[derive(Debug, Error)]
pub enum GmuError {
    /// Raised by the commit log when it is consulted before being fully
    /// constructed with a [`crate::version::VersionGenerator`], or after
    /// the enclosing component has been torn down. Fatal to the caller —
    /// this is a programmer error, not a transient condition.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Raised on the read path within a read-write transaction: the
    /// transaction has already performed a write and a subsequent read
    /// observed a value that is not the most recent committed one.
    /// Serializability requires writers to read the latest value, so the
    /// transaction must abort.
    #[error("read returned a value older than the transaction's own writes, must roll back")]
    ReadOldValueMustRollback,

    /// Raised during read-set validation at prepare: a key this
    /// transaction read has since been committed with a newer value by a
    /// concurrent transaction. The transaction aborts.
    #[error("read-write conflict on prepare: key was modified after it was read")]
    ReadWriteConflict,

    /// Raised when two [`crate::version::VectorVersion`] values tagged
    /// with different [`crate::types::SnapshotId`]s are compared or
    /// merged. Comparing across cluster snapshots requires an explicit
    /// `project_onto` first; silently projecting is a bug.
    #[error("cannot compare vector versions from different cluster snapshots ({a:?} vs {b:?})")]
    CrossSnapshot {
        /// Snapshot tag of the left-hand version.
        a: crate::types::SnapshotId,
        /// Snapshot tag of the right-hand version.
        b: crate::types::SnapshotId,
    },

    /// Raised by `wait_for_version` or `await_until_ready_to_commit` when
    /// the configured deadline elapses before the awaited condition holds.
    /// The transaction aborts and the condition is surfaced to the client.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Raised at any suspension point when the waiting thread is
    /// cancelled. Propagates as a retriable error out of
    /// `wait_for_version`; the outermost transaction handler treats it as
    /// an abort.
    #[error("interrupted while waiting for {0}")]
    Interrupted(&'static str),

    /// Raised when applying a committed write to the data container fails
    /// during the commit batch. Logged and NOT rethrown: a partial quorum
    /// of nodes must not diverge by having some commit and others roll back
    /// once the transaction has been validated and ordered.
    #[error("failed to apply committed write to the data container: {0}")]
    CommitApplyFailed(String),
}
