//! GMU transactional core — concurrency layer
//!
//! Implements the four components of the GMU protocol that sit above the
//! vector-version algebra in `gmu-core`:
//! - [`commit_log`]: the append-only chain of committed versions
//! - [`queue`]: the sorted transaction queue transactions wait in between
//!   prepare and commit
//! - [`commit_manager`]: sequences prepared transactions onto the commit
//!   log; the queue is re-keyed onto each entry's resolved commit version
//!   before drain, so release order follows commit order even when it
//!   differs from prepare order
//! - [`transaction`]: the per-transaction entry-wrapping state machine that
//!   ties the above together into read/prepare/commit/rollback
//!
//! None of these types know how keys are distributed, stored, or shipped
//! across the wire — they consume `gmu_core::collaborators` traits for
//! that.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit_log;
pub mod commit_manager;
pub mod queue;
pub mod transaction;

pub use commit_log::{CommitLog, CommittedTransaction};
pub use commit_manager::TransactionCommitManager;
pub use queue::{SortedTransactionQueue, TransactionState};
pub use transaction::{GmuTransaction, TransactionOutcome};
