//! The Sorted Transaction Queue
//!
//! Transactions enter the queue keyed by their prepare-time coordinate —
//! the local-node projection of their prepare vector, reduced to a scalar
//! since this node only ever advances its own coordinate — with
//! `concurrent_clock` and `tx_id` as tie-breaks. Once an entry's commit
//! version is known, its key is replaced by the commit version's own
//! coordinate and the entry is re-sorted: a transaction that started
//! preparing earlier can still be handed to the commit log after one that
//! started later, if the later one resolves to a lower commit version.
//! Release order always follows this resolved-version order, never raw
//! prepare order.
//!
//! Each entry owns a private one-shot latch (`Mutex<TransactionState>` +
//! `Condvar`), so a thread can block on *its own* transaction's progress
//! without contending on the queue-wide lock — only the map structure
//! itself is shared.

use gmu_core::error::{GmuError, GmuResult};
use gmu_core::types::TxId;
use gmu_core::version::WriteVersion;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A transaction entry's lifecycle within the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Enqueued, still computing its commit version.
    Pending,
    /// Commit version computed; waiting for its turn to be applied to the
    /// commit log.
    ReadyToCommit,
    /// Applied to the commit log.
    Committed,
    /// Abandoned — either it failed validation or an earlier entry did and
    /// this one can no longer safely proceed.
    RolledBack,
}

/// The queue's sort key: a resolved-version coordinate (prepare-time until
/// re-keyed to the commit version), then `concurrent_clock`, then `tx_id`
/// as further tie-breaks among entries that land on the same coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    version_coord: i64,
    concurrent_clock: u64,
    tx_id: TxId,
}

struct QueueEntry<K> {
    tx_id: TxId,
    key: Mutex<QueueKey>,
    state: Mutex<TransactionState>,
    changed: Condvar,
    commit_version: Mutex<Option<WriteVersion>>,
    modifications: Mutex<Option<Vec<K>>>,
}

/// A transaction that has reached [`TransactionState::ReadyToCommit`] and
/// is about to be handed to the commit log.
pub struct ReadyTransaction<K> {
    /// The transaction's identity.
    pub tx_id: TxId,
    /// Its concurrent-clock ordering key within the queue.
    pub concurrent_clock: u64,
    /// Its computed commit version.
    pub commit_version: WriteVersion,
    /// The keys it modified, or `None` for "all keys".
    pub modifications: Option<Vec<K>>,
}

struct QueueState<K> {
    by_clock: HashMap<u64, Arc<QueueEntry<K>>>,
    order: BTreeMap<QueueKey, u64>,
}

/// Orders prepared transactions by their resolved-version coordinate and
/// releases them to the commit manager strictly in that order.
pub struct SortedTransactionQueue<K> {
    state: Mutex<QueueState<K>>,
}

impl<K> Default for SortedTransactionQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> SortedTransactionQueue<K> {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                by_clock: HashMap::new(),
                order: BTreeMap::new(),
            }),
        }
    }

    /// Reserve `concurrent_clock`'s place in the queue for `tx_id`, sorted
    /// initially by `prepare_coord` — the local-node coordinate of its
    /// prepare-time vector. This position is provisional: it only fixes
    /// release order among entries whose commit version is never re-keyed
    /// ahead of or behind one another.
    ///
    /// # Errors
    /// [`GmuError::IllegalState`] if `concurrent_clock` is already
    /// occupied — clock values must be assigned by a single monotonic
    /// [`gmu_core::collaborators::ClockSource`], so a collision means a
    /// caller reused a value.
    pub fn enqueue(&self, tx_id: TxId, concurrent_clock: u64, prepare_coord: i64) -> GmuResult<()> {
        let mut state = self.state.lock();
        if state.by_clock.contains_key(&concurrent_clock) {
            return Err(GmuError::IllegalState(format!(
                "concurrent_clock {concurrent_clock} is already enqueued"
            )));
        }
        let key = QueueKey {
            version_coord: prepare_coord,
            concurrent_clock,
            tx_id,
        };
        state.order.insert(key, concurrent_clock);
        state.by_clock.insert(
            concurrent_clock,
            Arc::new(QueueEntry {
                tx_id,
                key: Mutex::new(key),
                state: Mutex::new(TransactionState::Pending),
                changed: Condvar::new(),
                commit_version: Mutex::new(None),
                modifications: Mutex::new(None),
            }),
        );
        Ok(())
    }

    /// Record that `concurrent_clock`'s transaction has computed its
    /// commit version and re-key its position in the queue to
    /// `commit_coord` — the commit version's own local-node coordinate.
    /// A transaction that prepared earlier than another, but resolves to a
    /// higher coordinate, moves behind it.
    ///
    /// # Errors
    /// [`GmuError::IllegalState`] if the entry is unknown or not
    /// [`TransactionState::Pending`].
    pub fn mark_ready_to_commit(
        &self,
        concurrent_clock: u64,
        commit_version: WriteVersion,
        commit_coord: i64,
        modifications: Option<Vec<K>>,
    ) -> GmuResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .by_clock
            .get(&concurrent_clock)
            .cloned()
            .ok_or_else(|| {
                GmuError::IllegalState(format!(
                    "concurrent_clock {concurrent_clock} is not in the queue"
                ))
            })?;
        let mut tx_state = entry.state.lock();
        if *tx_state != TransactionState::Pending {
            return Err(GmuError::IllegalState(format!(
                "concurrent_clock {concurrent_clock} is not pending (state: {:?})",
                *tx_state
            )));
        }
        let mut key = entry.key.lock();
        let old_key = *key;
        state.order.remove(&old_key);
        let new_key = QueueKey {
            version_coord: commit_coord,
            concurrent_clock,
            tx_id: entry.tx_id,
        };
        state.order.insert(new_key, concurrent_clock);
        *key = new_key;
        drop(key);

        *entry.commit_version.lock() = Some(commit_version);
        *entry.modifications.lock() = modifications;
        *tx_state = TransactionState::ReadyToCommit;
        entry.changed.notify_all();
        tracing::debug!(concurrent_clock, commit_coord, "transaction ready to commit, re-keyed");
        Ok(())
    }

    /// Abandon `concurrent_clock`'s transaction, removing it from the
    /// queue and waking anyone blocked on it.
    ///
    /// A transaction can be rolled back from [`TransactionState::Pending`]
    /// or [`TransactionState::ReadyToCommit`], but never after it has
    /// already reached [`TransactionState::Committed`].
    pub fn rollback(&self, concurrent_clock: u64) -> GmuResult<()> {
        let entry = {
            let mut state = self.state.lock();
            let entry = state.by_clock.remove(&concurrent_clock);
            if let Some(entry) = &entry {
                let key = *entry.key.lock();
                state.order.remove(&key);
            }
            entry
        };
        let Some(entry) = entry else {
            return Err(GmuError::IllegalState(format!(
                "concurrent_clock {concurrent_clock} is not in the queue"
            )));
        };
        let mut tx_state = entry.state.lock();
        if *tx_state == TransactionState::Committed {
            return Err(GmuError::IllegalState(format!(
                "concurrent_clock {concurrent_clock} already committed, cannot roll back"
            )));
        }
        *tx_state = TransactionState::RolledBack;
        entry.changed.notify_all();
        tracing::debug!(concurrent_clock, "transaction rolled back");
        Ok(())
    }

    /// Block until `concurrent_clock`'s entry leaves
    /// [`TransactionState::Pending`], or `timeout` elapses.
    ///
    /// # Errors
    /// [`GmuError::Timeout`] if `timeout` elapses first.
    /// [`GmuError::IllegalState`] if the entry is unknown (it has already
    /// been drained by [`SortedTransactionQueue::drain_ready`]).
    pub fn await_until_ready_to_commit(
        &self,
        concurrent_clock: u64,
        timeout: Option<Duration>,
    ) -> GmuResult<TransactionState> {
        let entry = self.lookup(concurrent_clock)?;
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = entry.state.lock();
        loop {
            if *state != TransactionState::Pending {
                return Ok(*state);
            }
            match deadline {
                None => entry.changed.wait(&mut state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(GmuError::Timeout("await_until_ready_to_commit"));
                    }
                    entry.changed.wait_for(&mut state, deadline - now);
                }
            }
        }
    }

    /// Pop the maximal prefix of entries, in ascending resolved-coordinate
    /// order, that are [`TransactionState::ReadyToCommit`] — stopping at
    /// the first entry that is still [`TransactionState::Pending`]. Commit
    /// order follows the resolved coordinate, so a gap blocks everything
    /// behind it.
    ///
    /// Rolled-back entries at the front of the queue are silently skipped
    /// and removed — they impose no ordering obligation on anyone once
    /// abandoned.
    pub fn drain_ready(&self) -> Vec<ReadyTransaction<K>> {
        let mut state = self.state.lock();
        let mut ready = Vec::new();
        loop {
            let Some((&key, &clock)) = state.order.iter().next() else {
                break;
            };
            let entry = state.by_clock.get(&clock).cloned().expect("order/by_clock in sync");
            let tx_state = *entry.state.lock();
            match tx_state {
                TransactionState::RolledBack => {
                    state.order.remove(&key);
                    state.by_clock.remove(&clock);
                }
                TransactionState::ReadyToCommit => {
                    state.order.remove(&key);
                    state.by_clock.remove(&clock);
                    *entry.state.lock() = TransactionState::Committed;
                    entry.changed.notify_all();
                    let commit_version = entry
                        .commit_version
                        .lock()
                        .clone()
                        .expect("ready_to_commit entries always carry a commit_version");
                    let modifications = entry.modifications.lock().clone();
                    ready.push(ReadyTransaction {
                        tx_id: entry.tx_id,
                        concurrent_clock: clock,
                        commit_version,
                        modifications,
                    });
                }
                TransactionState::Pending | TransactionState::Committed => break,
            }
        }
        ready
    }

    /// Number of entries still tracked (pending or ready, not yet drained
    /// or rolled back).
    pub fn len(&self) -> usize {
        self.state.lock().by_clock.len()
    }

    /// Whether the queue currently tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().by_clock.is_empty()
    }

    fn lookup(&self, concurrent_clock: u64) -> GmuResult<Arc<QueueEntry<K>>> {
        self.state
            .lock()
            .by_clock
            .get(&concurrent_clock)
            .cloned()
            .ok_or_else(|| {
                GmuError::IllegalState(format!(
                    "concurrent_clock {concurrent_clock} is not in the queue"
                ))
            })
    }
}
