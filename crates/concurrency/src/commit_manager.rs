//! The Transaction Commit Manager
//!
//! Sits between the entry-wrapping protocol ([`crate::transaction`]) and
//! the commit log. Assigns each write transaction its place in commit
//! order, sequences prepared transactions onto the commit log strictly in
//! that order via the [`crate::queue::SortedTransactionQueue`], and
//! de-duplicates commit application by `tx_id` so a transaction delivered
//! twice (retried prepare, replayed replication message) is only ever
//! applied once.

use crate::commit_log::{CommitLog, CommittedTransaction};
use crate::queue::SortedTransactionQueue;
use gmu_core::collaborators::ClockSource;
use gmu_core::error::GmuResult;
use gmu_core::types::TxId;
use gmu_core::version::{VectorVersion, WriteVersion};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Coordinates prepare-order assignment, commit sequencing, and idempotent
/// commit application for a single node.
pub struct TransactionCommitManager<K> {
    commit_log: Arc<CommitLog<K>>,
    queue: SortedTransactionQueue<K>,
    clock: Arc<dyn ClockSource>,
    applied: Mutex<HashSet<TxId>>,
    /// Guards commit-version allocation: every write transaction that
    /// reaches [`TransactionCommitManager::reserve_commit_version`] merges
    /// against this reservation and advances it before releasing the
    /// lock, so two transactions can never read the same "current" basis
    /// and allocate the same local coordinate — regardless of how far
    /// behind the commit log itself (which only advances once an entry is
    /// actually drained) has fallen.
    reservation: Mutex<VectorVersion>,
}

impl<K: Clone> TransactionCommitManager<K> {
    /// Build a commit manager over `commit_log`, assigning prepare order
    /// from `clock`.
    pub fn new(commit_log: Arc<CommitLog<K>>, clock: Arc<dyn ClockSource>) -> Self {
        let reservation = commit_log.generator().generate_new();
        Self {
            commit_log,
            queue: SortedTransactionQueue::new(),
            clock,
            applied: Mutex::new(HashSet::new()),
            reservation: Mutex::new(reservation),
        }
    }

    /// The commit log this manager sequences commits onto.
    pub fn commit_log(&self) -> &Arc<CommitLog<K>> {
        &self.commit_log
    }

    /// Reserve `tx_id`'s place in commit order and return the
    /// `concurrent_clock` it was assigned.
    ///
    /// Must be called once, before the transaction begins validating its
    /// read set — the clock value fixes this transaction's position
    /// relative to every other write transaction preparing concurrently.
    /// The queue's initial sort position is the commit log's current
    /// local coordinate at this moment; it is provisional and gets
    /// replaced once [`TransactionCommitManager::reserve_commit_version`]
    /// resolves the transaction's actual commit coordinate.
    pub fn prepare_transaction(&self, tx_id: TxId) -> GmuResult<u64> {
        let concurrent_clock = self.clock.tick();
        let prepare_coord = self
            .commit_log
            .get_current_version()?
            .get(self.commit_log.local_node());
        self.queue.enqueue(tx_id, concurrent_clock, prepare_coord)?;
        tracing::debug!(tx_id = %tx_id, concurrent_clock, "transaction entered commit queue");
        Ok(concurrent_clock)
    }

    /// Allocate this transaction's commit version: the merge of
    /// `merge_with` (its own causal read vector) with every coordinate
    /// reserved so far, with the local node's coordinate advanced by one.
    ///
    /// This is the transaction's serialization point. Two write
    /// transactions calling this concurrently cannot allocate the same
    /// local coordinate: the whole read-merge-increment sequence runs
    /// under a single lock that is itself advanced before release, so the
    /// next caller always merges against the coordinate just handed out
    /// rather than a stale read of the commit log.
    ///
    /// When a transaction's write set spans keys owned by more than one
    /// node, a coordinator outside this crate (wire protocol and cluster
    /// membership are out of scope here) collects each owner's vote and
    /// folds them together with [`gmu_core::version::VectorVersion::merge_max`]
    /// before any owner applies the write — the same algebra
    /// [`gmu_core::version::VersionGenerator::merge_and_max`] already
    /// provides.
    pub fn reserve_commit_version(
        &self,
        concurrent_clock: u64,
        merge_with: &VectorVersion,
    ) -> GmuResult<WriteVersion> {
        let generator = self.commit_log.generator();
        let mut reservation = self.reservation.lock();
        let current = self.commit_log.get_current_version()?;
        let merged = reservation.merge_max([merge_with])?.merge_max([&current])?;
        let commit_vector = generator.increment_local(&merged, self.commit_log.local_node())?;
        *reservation = commit_vector.clone();
        Ok(generator.convert_to_write(commit_vector, concurrent_clock))
    }

    /// The read snapshot a read-only transaction should use.
    ///
    /// Read-only transactions never enter the queue: they take no commit
    /// slot and impose no ordering obligation on writers.
    pub fn prepare_read_only_transaction(&self) -> GmuResult<VectorVersion> {
        self.commit_log.get_current_version()
    }

    /// Record `tx_id`'s resolved commit version, re-keying its place in the
    /// queue to that version's coordinate, then drain and apply every
    /// transaction this unblocks, in resolved-coordinate order.
    ///
    /// Returns the batch actually applied to the commit log as a result of
    /// this call — which may include transactions other than `tx_id` if
    /// their own `mark_ready_to_commit` had already landed and this call
    /// closed the gap in front of them.
    pub fn commit_transaction(
        &self,
        tx_id: TxId,
        concurrent_clock: u64,
        commit_version: WriteVersion,
        modifications: Option<Vec<K>>,
    ) -> GmuResult<Vec<CommittedTransaction<K>>> {
        let commit_coord = commit_version.vector().get(self.commit_log.local_node());
        self.queue.mark_ready_to_commit(
            concurrent_clock,
            commit_version,
            commit_coord,
            modifications,
        )?;
        // The mandatory suspension point between "marked ready" and "handed
        // to the commit log" — a no-op wait here since we just set this
        // entry's state ourselves, but it is the same primitive a remote
        // commit path (outside this crate's scope) would block on while
        // waiting for its turn.
        self.queue.await_until_ready_to_commit(concurrent_clock, None)?;
        let batch = self.get_transactions_to_commit()?;
        tracing::info!(
            tx_id = %tx_id,
            concurrent_clock,
            applied = batch.len(),
            "transaction marked ready, batch applied"
        );
        Ok(batch)
    }

    /// Drain the queue's ready prefix and apply it to the commit log.
    ///
    /// Safe to call speculatively (e.g. after a timer tick) — an empty
    /// queue or a queue whose head is still pending is a no-op.
    pub fn get_transactions_to_commit(&self) -> GmuResult<Vec<CommittedTransaction<K>>> {
        let ready = self.queue.drain_ready();
        if ready.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<CommittedTransaction<K>> = ready
            .into_iter()
            .map(|r| CommittedTransaction {
                tx_id: r.tx_id,
                version: r.commit_version.vector().clone(),
                sub_version: r.commit_version.sub_version(),
                modifications: r.modifications,
                concurrent_clock: r.concurrent_clock,
            })
            .collect();
        self.apply(&batch)?;
        Ok(batch)
    }

    /// Apply a commit batch to the local commit log, skipping any
    /// transaction already applied.
    ///
    /// This is the entry point for commits that arrive from outside this
    /// node's own queue — replicated from the write owner, or redelivered
    /// after a retry.
    pub fn transaction_committed(&self, batch: &[CommittedTransaction<K>]) -> GmuResult<()> {
        let fresh: Vec<CommittedTransaction<K>> = {
            let mut applied = self.applied.lock();
            batch
                .iter()
                .filter(|tx| applied.insert(tx.tx_id))
                .cloned()
                .collect()
        };
        if fresh.is_empty() {
            tracing::debug!(batch_len = batch.len(), "commit batch fully duplicate, skipped");
            return Ok(());
        }
        self.commit_log.insert_new_committed_versions(&fresh)
    }

    /// Abandon `concurrent_clock`'s transaction.
    pub fn rollback_transaction(&self, concurrent_clock: u64) -> GmuResult<()> {
        self.queue.rollback(concurrent_clock)
    }

    fn apply(&self, batch: &[CommittedTransaction<K>]) -> GmuResult<()> {
        let mut applied = self.applied.lock();
        for tx in batch {
            applied.insert(tx.tx_id);
        }
        drop(applied);
        self.commit_log.insert_new_committed_versions(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmu_core::types::{ClusterSnapshot, NodeId, SnapshotId};
    use gmu_core::version::VersionGenerator;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TestClock(AtomicU64);

    impl ClockSource for TestClock {
        fn tick(&self) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    fn manager() -> TransactionCommitManager<String> {
        let snapshot = ClusterSnapshot::new(SnapshotId(1), vec![NodeId::new(0)]);
        let generator = VersionGenerator::new(snapshot);
        let log = Arc::new(CommitLog::new(generator, NodeId::new(0)));
        TransactionCommitManager::new(log, Arc::new(TestClock(AtomicU64::new(0))))
    }

    fn write_version(manager: &TransactionCommitManager<String>, coord: i64) -> WriteVersion {
        let generator = manager.commit_log().generator();
        let mut v = generator.generate_new();
        for _ in 0..coord {
            v = generator.increment_local(&v, NodeId::new(0)).unwrap();
        }
        generator.convert_to_write(v, 0)
    }

    #[test]
    fn single_writer_commits_and_advances_log() {
        let m = manager();
        let clock = m.prepare_transaction(TxId(1)).unwrap();
        let wv = write_version(&m, 1);
        let batch = m
            .commit_transaction(TxId(1), clock, wv, Some(vec!["k".into()]))
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(m.commit_log().get_current_version().unwrap().get(NodeId::new(0)), 1);
    }

    #[test]
    fn out_of_order_prepare_waits_for_gap() {
        let m = manager();
        let clock_a = m.prepare_transaction(TxId(1)).unwrap();
        let clock_b = m.prepare_transaction(TxId(2)).unwrap();

        let wv_b = write_version(&m, 2);
        let batch = m
            .commit_transaction(TxId(2), clock_b, wv_b, None)
            .unwrap();
        assert!(batch.is_empty(), "tx1 still pending, tx2 must wait");

        let wv_a = write_version(&m, 1);
        let batch = m
            .commit_transaction(TxId(1), clock_a, wv_a, None)
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn duplicate_commit_delivery_is_idempotent() {
        let m = manager();
        let clock = m.prepare_transaction(TxId(1)).unwrap();
        let wv = write_version(&m, 1);
        let batch = m
            .commit_transaction(TxId(1), clock, wv, None)
            .unwrap();

        m.transaction_committed(&batch).unwrap();
        assert_eq!(
            m.commit_log().get_current_version().unwrap().get(NodeId::new(0)),
            1,
            "redelivery must not double-apply"
        );
    }

    #[test]
    fn read_only_prepare_skips_queue() {
        let m = manager();
        let v = m.prepare_read_only_transaction().unwrap();
        assert_eq!(v.get(NodeId::new(0)), 0);
        assert!(m.queue.is_empty());
    }

    #[test]
    fn rollback_unblocks_transactions_behind_it() {
        let m = manager();
        let clock_a = m.prepare_transaction(TxId(1)).unwrap();
        let clock_b = m.prepare_transaction(TxId(2)).unwrap();

        let wv_b = write_version(&m, 1);
        m.commit_transaction(TxId(2), clock_b, wv_b, None).unwrap();
        m.rollback_transaction(clock_a).unwrap();

        let batch = m.get_transactions_to_commit().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].tx_id, TxId(2));
    }

    #[test]
    fn concurrent_reservations_never_collide_on_local_coordinate() {
        use std::thread;

        let m = Arc::new(manager());
        let read_vector = m.commit_log().get_current_version().unwrap();

        let handles: Vec<_> = (0u64..8)
            .map(|i| {
                let m = Arc::clone(&m);
                let read_vector = read_vector.clone();
                thread::spawn(move || {
                    let clock = m.prepare_transaction(TxId(i)).unwrap();
                    let wv = m.reserve_commit_version(clock, &read_vector).unwrap();
                    m.commit_transaction(TxId(i), clock, wv.clone(), None).unwrap();
                    wv.vector().get(NodeId::new(0))
                })
            })
            .collect();

        let mut coords: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        coords.sort_unstable();
        assert_eq!(
            coords,
            (1..=8).collect::<Vec<_>>(),
            "every reservation must land on a distinct, contiguous local coordinate"
        );
        assert_eq!(
            m.commit_log().get_current_version().unwrap().get(NodeId::new(0)),
            8
        );
    }
}
