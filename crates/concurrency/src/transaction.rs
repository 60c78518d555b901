//! The GMU Entry-Wrapping Protocol
//!
//! Wraps a single transaction's lifecycle — read, write, commit, rollback —
//! around the lower components: it takes its read snapshot from
//! [`crate::commit_log::CommitLog`] (via
//! [`crate::commit_manager::TransactionCommitManager`]), buffers writes
//! locally, validates its read set at commit time, and on success hands its
//! commit version to the commit manager for sequencing.
//!
//! Reads and writes flow through the caller's own
//! [`gmu_core::collaborators::DataContainer`] and
//! [`gmu_core::collaborators::DistributionManager`] — this module owns the
//! protocol state machine, not storage or routing.

use gmu_core::collaborators::{DataContainer, DistributionManager};
use gmu_core::error::{GmuError, GmuResult};
use gmu_core::types::TxId;
use gmu_core::version::ReadVersion;
use std::sync::Arc;

use crate::commit_log::CommittedTransaction;
use crate::commit_manager::TransactionCommitManager;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionPhase {
    /// Reading and/or buffering writes.
    Active,
    /// Terminated successfully.
    Committed,
    /// Terminated by abort, either requested or forced by a failed
    /// validation.
    RolledBack,
}

/// The result of a transaction finishing its commit attempt.
#[derive(Debug)]
pub enum TransactionOutcome<K> {
    /// The transaction had no writes; nothing was sequenced onto the
    /// commit log.
    ReadOnly,
    /// The transaction's writes were sequenced and applied. `batch`
    /// contains every transaction this commit unblocked, which may include
    /// others besides this one.
    Committed {
        /// The transactions applied to the commit log as a result of this
        /// commit, in commit order.
        batch: Vec<CommittedTransaction<K>>,
    },
}

/// A single transaction's entry-wrapping state.
pub struct GmuTransaction<K, V> {
    tx_id: TxId,
    read_version: ReadVersion,
    read_set: Vec<K>,
    write_set: Vec<(K, V)>,
    data_container: Arc<dyn DataContainer<K, V>>,
    distribution_manager: Arc<dyn DistributionManager<K>>,
    commit_manager: Arc<TransactionCommitManager<K>>,
    phase: TransactionPhase,
}

impl<K, V> GmuTransaction<K, V>
where
    K: Clone + PartialEq,
    V: Clone,
{
    /// Begin a transaction, taking its read snapshot from the commit log.
    /// Construction always takes the current committed version — there is
    /// no "upgrade" from a stale snapshot.
    pub fn begin(
        tx_id: TxId,
        commit_manager: Arc<TransactionCommitManager<K>>,
        data_container: Arc<dyn DataContainer<K, V>>,
        distribution_manager: Arc<dyn DistributionManager<K>>,
    ) -> GmuResult<Self> {
        let current = commit_manager.prepare_read_only_transaction()?;
        let read_version = commit_manager
            .commit_log()
            .get_read_version(Some(&current))?;
        tracing::debug!(tx_id = %tx_id, "transaction started");
        Ok(Self {
            tx_id,
            read_version,
            read_set: Vec::new(),
            write_set: Vec::new(),
            data_container,
            distribution_manager,
            commit_manager,
            phase: TransactionPhase::Active,
        })
    }

    /// This transaction's identity.
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// The snapshot this transaction is reading at.
    pub fn read_version(&self) -> &ReadVersion {
        &self.read_version
    }

    /// Read `key` at this transaction's snapshot.
    ///
    /// Buffered writes from earlier in this same transaction shadow the
    /// underlying store (read-your-own-writes).
    ///
    /// # Errors
    /// [`GmuError::ReadOldValueMustRollback`] if the data container reports
    /// the value visible at this snapshot is not the most recently
    /// committed one — this transaction's view has fallen behind in a way
    /// that cannot be reconciled, and it must be rolled back. The
    /// transaction is marked rolled back immediately so any further call
    /// fails the same way rather than silently reading again.
    pub fn read(&mut self, key: &K) -> GmuResult<Option<V>> {
        self.require_active()?;
        if let Some((_, v)) = self.write_set.iter().rev().find(|(k, _)| k == key) {
            return Ok(Some(v.clone()));
        }
        if !self.data_container.is_most_recent(key, &self.read_version)? {
            self.phase = TransactionPhase::RolledBack;
            tracing::warn!(tx_id = %self.tx_id, "read observed a stale most-recent value, forcing rollback");
            return Err(GmuError::ReadOldValueMustRollback);
        }
        let value = self.data_container.get(key, &self.read_version)?;
        self.read_set.push(key.clone());
        Ok(value)
    }

    /// Buffer a write for `key`. Not applied to the data container until
    /// [`GmuTransaction::commit`] succeeds.
    pub fn write(&mut self, key: K, value: V) -> GmuResult<()> {
        self.require_active()?;
        self.write_set.push((key, value));
        Ok(())
    }

    /// Validate the read set, sequence this transaction's commit version,
    /// and apply its writes — the one-phase commit path: prepare and commit
    /// collapse into a single call rather than a two-round-trip handshake,
    /// since this crate has no remote participants to coordinate with.
    ///
    /// # Errors
    /// [`GmuError::ReadWriteConflict`] if any key in the read set is no
    /// longer the most recently committed value — another transaction
    /// committed a conflicting write since this one read it. The
    /// transaction's writes are discarded; nothing is applied.
    pub fn commit(mut self) -> GmuResult<TransactionOutcome<K>> {
        self.require_active()?;

        if self.write_set.is_empty() {
            self.phase = TransactionPhase::Committed;
            return Ok(TransactionOutcome::ReadOnly);
        }

        for key in &self.read_set {
            if !self
                .data_container
                .is_most_recent(key, &self.read_version)?
            {
                self.phase = TransactionPhase::RolledBack;
                tracing::warn!(tx_id = %self.tx_id, "read-write conflict detected at commit");
                return Err(GmuError::ReadWriteConflict);
            }
        }

        let concurrent_clock = self.commit_manager.prepare_transaction(self.tx_id)?;
        // The concurrent_clock doubles as the sub-version tiebreaker: two
        // transactions that land on the same vector coordinate are still
        // distinguishable, since clock values are assigned monotonically
        // and never repeat. Allocation of the coordinate itself happens
        // inside the commit manager, serialized against every other write
        // transaction preparing concurrently on this node.
        let write_version = self
            .commit_manager
            .reserve_commit_version(concurrent_clock, self.read_version.vector())?;

        let mut modified_keys = Vec::with_capacity(self.write_set.len());
        for (key, value) in self.write_set.drain(..) {
            let skip_ownership_check = !self.distribution_manager.local_node_is_owner(&key);
            modified_keys.push(key.clone());
            if let Err(err) = self.data_container.commit_entry(
                &key,
                value,
                &write_version,
                skip_ownership_check,
            ) {
                // Log-and-continue: the commit decision has already been
                // made and sequenced. A storage-layer failure applying one
                // key must not unwind a decision every other owner may have
                // already committed to.
                tracing::error!(tx_id = %self.tx_id, error = %err, "COMMIT_APPLY_FAILED");
            }
        }

        let batch = self.commit_manager.commit_transaction(
            self.tx_id,
            concurrent_clock,
            write_version,
            Some(modified_keys),
        )?;

        self.phase = TransactionPhase::Committed;
        Ok(TransactionOutcome::Committed { batch })
    }

    /// Abort the transaction. If it had already entered the commit queue
    /// (impossible before [`GmuTransaction::commit`] is called, since
    /// queue entry and write application happen atomically within that
    /// call), this is a pure no-op over buffered state.
    pub fn rollback(mut self) -> GmuResult<()> {
        self.phase = TransactionPhase::RolledBack;
        tracing::debug!(tx_id = %self.tx_id, "transaction rolled back by caller");
        Ok(())
    }

    fn require_active(&self) -> GmuResult<()> {
        match self.phase {
            TransactionPhase::Active => Ok(()),
            TransactionPhase::Committed => Err(GmuError::IllegalState(
                "transaction already committed".into(),
            )),
            TransactionPhase::RolledBack => Err(GmuError::IllegalState(
                "transaction already rolled back".into(),
            )),
        }
    }
}
