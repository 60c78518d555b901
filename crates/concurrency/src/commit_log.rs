//! The Commit Log
//!
//! An append-only chain of committed versions. Answers "what snapshot can a
//! transaction read?" (via [`CommitLog::get_read_version`]) and "has
//! version V been installed locally yet?" (via
//! [`CommitLog::wait_for_version`]).
//!
//! The chain is an append-only arena (`Vec<VersionEntry<K>>`) indexed by
//! stable `usize` positions rather than heap nodes linked by a mutable
//! pointer — a chain walk is just an index walk over a read-mostly array. A
//! single [`parking_lot::Mutex`] paired with a [`parking_lot::Condvar`]
//! guards the head pointer and the monotonic `most_recent_version`; once a
//! caller has snapshotted the head index, walking older entries needs no
//! further locking because entries are only ever appended, never mutated.

use gmu_core::error::GmuResult;
use gmu_core::types::NodeId;
use gmu_core::version::{ReadVersion, VectorVersion, VersionGenerator, VersionOrdering};
use parking_lot::{Condvar, Mutex};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// One committed transaction, ready to be linked into the commit log.
#[derive(Debug, Clone)]
pub struct CommittedTransaction<K> {
    /// The transaction's identity, used to dedupe idempotent re-delivery.
    pub tx_id: gmu_core::types::TxId,
    /// The vector version this transaction committed at.
    pub version: VectorVersion,
    /// Tiebreaker among transactions that share `version`.
    pub sub_version: u64,
    /// The keys this transaction modified, or `None` for "all keys" (a
    /// clear/truncate style command).
    pub modifications: Option<Vec<K>>,
    /// The local logical clock value at the moment this transaction became
    /// ready to commit.
    pub concurrent_clock: u64,
}

/// A single link in the commit log's chain.
#[derive(Debug, Clone)]
struct VersionEntry<K> {
    version: VectorVersion,
    sub_version: u64,
    keys_modified: Option<Vec<K>>,
    prev: Option<usize>,
}

struct Inner<K> {
    entries: Vec<VersionEntry<K>>,
    head: Option<usize>,
    most_recent_version: VectorVersion,
}

/// Append-only chain of committed versions, keyed to a single local node's
/// coordinate.
pub struct CommitLog<K> {
    generator: VersionGenerator,
    local_node: NodeId,
    inner: Mutex<Inner<K>>,
    changed: Condvar,
}

impl<K: Clone> CommitLog<K> {
    /// Construct a commit log for `local_node`, backed by `generator`.
    ///
    /// There is no separate "enable" step: the generator is a mandatory
    /// constructor argument, so the log is usable from the moment it
    /// exists.
    pub fn new(generator: VersionGenerator, local_node: NodeId) -> Self {
        let most_recent_version = generator.generate_new();
        Self {
            generator,
            local_node,
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                head: None,
                most_recent_version,
            }),
            changed: Condvar::new(),
        }
    }

    /// The current, locally-consistent version: `most_recent_version`
    /// re-projected onto the generator's cluster snapshot.
    pub fn get_current_version(&self) -> GmuResult<VectorVersion> {
        let inner = self.inner.lock();
        self.generator.updated_version(&inner.most_recent_version)
    }

    /// The greatest version reachable in the chain that is `<= other`.
    ///
    /// If `other` is `None`, this is equivalent to
    /// [`CommitLog::get_current_version`]. If `other` already has a defined
    /// coordinate for the local node, it is returned unchanged — the
    /// caller already holds a valid local coordinate and no chain walk is
    /// needed.
    pub fn get_available_version_less_than(
        &self,
        other: Option<&VectorVersion>,
    ) -> GmuResult<VectorVersion> {
        let other = match other {
            None => return self.get_current_version(),
            Some(v) => v,
        };
        if other.get(self.local_node) != gmu_core::version::NON_EXISTING {
            return Ok(other.clone());
        }

        let inner = self.inner.lock();
        let mut acc = self.generator.generate_new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let entry = &inner.entries[idx];
            if matches!(
                entry.version.compare(other)?,
                VersionOrdering::Before | VersionOrdering::Equal | VersionOrdering::BeforeOrEqual
            ) {
                acc = acc.merge_max([&entry.version])?;
            }
            cursor = entry.prev;
        }
        Ok(acc)
    }

    /// The read snapshot for a transaction reading at `other`: the vector
    /// itself, plus every chain entry whose local coordinate is `<= other`'s
    /// but whose full vector is not `<= other` — versions installed locally
    /// but not yet visible to this reader.
    pub fn get_read_version(&self, other: Option<&VectorVersion>) -> GmuResult<ReadVersion> {
        let base = match other {
            Some(v) => v.clone(),
            None => self.get_current_version()?,
        };
        let mut read_version = self.generator.convert_to_read(base.clone());

        let inner = self.inner.lock();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let entry = &inner.entries[idx];
            let entry_local = entry.version.get(self.local_node);
            if entry_local != gmu_core::version::NON_EXISTING
                && entry_local <= base.get(self.local_node)
                && !matches!(
                    entry.version.compare(&base)?,
                    VersionOrdering::Before | VersionOrdering::Equal | VersionOrdering::BeforeOrEqual
                )
            {
                read_version.mark_not_visible(entry_local, entry.sub_version);
            }
            cursor = entry.prev;
        }
        Ok(read_version)
    }

    /// Link `batch` into the chain in order, advance `most_recent_version`
    /// by merge-max, and wake every thread blocked in
    /// [`CommitLog::wait_for_version`].
    pub fn insert_new_committed_versions(
        &self,
        batch: &[CommittedTransaction<K>],
    ) -> GmuResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        for tx in batch {
            let entry = VersionEntry {
                version: tx.version.clone(),
                sub_version: tx.sub_version,
                keys_modified: tx.modifications.clone(),
                prev: inner.head,
            };
            inner.entries.push(entry);
            inner.head = Some(inner.entries.len() - 1);
            inner.most_recent_version = inner.most_recent_version.merge_max([&tx.version])?;
            tracing::debug!(
                tx_id = %tx.tx_id,
                local_coord = inner.most_recent_version.get(self.local_node),
                "linked committed transaction into commit log"
            );
        }
        tracing::info!(
            batch_len = batch.len(),
            head = inner.most_recent_version.get(self.local_node),
            "installed committed batch, head advanced"
        );
        self.changed.notify_all();
        Ok(())
    }

    /// Block until `most_recent_version`'s local coordinate is `>= v`'s, or
    /// until `timeout` elapses.
    ///
    /// `timeout = None` waits forever. Returns whether the condition holds
    /// at the moment this call returns.
    pub fn wait_for_version(&self, v: &VectorVersion, timeout: Option<Duration>) -> bool {
        let target = v.get(self.local_node);
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut inner = self.inner.lock();
        loop {
            if inner.most_recent_version.get(self.local_node) >= target {
                return true;
            }
            match deadline {
                None => self.changed.wait(&mut inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(target, "timed out waiting for commit log version");
                        return inner.most_recent_version.get(self.local_node) >= target;
                    }
                    let timed_out = self
                        .changed
                        .wait_for(&mut inner, deadline - now)
                        .timed_out();
                    if timed_out {
                        return inner.most_recent_version.get(self.local_node) >= target;
                    }
                }
            }
        }
    }

    /// Write a diagnostic text dump of the chain, one `<version> = <keys>`
    /// line per entry, newest first.
    pub fn dump(&self) -> String
    where
        K: std::fmt::Debug,
    {
        let inner = self.inner.lock();
        let mut out = String::new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let entry = &inner.entries[idx];
            let keys = match &entry.keys_modified {
                None => "ALL".to_string(),
                Some(keys) => format!("{:?}", keys),
            };
            let _ = writeln!(out, "{} = {}", entry.version.get(self.local_node), keys);
            cursor = entry.prev;
        }
        out
    }

    /// The version generator this commit log advances against.
    pub fn generator(&self) -> &VersionGenerator {
        &self.generator
    }

    /// The local node this commit log tracks the coordinate for.
    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use gmu_core::types::{ClusterSnapshot, SnapshotId, TxId};
    use std::sync::Arc;
    use std::thread;

    const LOCAL: NodeId = NodeId(0);

    fn log(n: u32) -> CommitLog<String> {
        let snapshot = ClusterSnapshot::new(
            SnapshotId(1),
            (0..n).map(NodeId::new).collect::<Vec<_>>(),
        );
        CommitLog::new(VersionGenerator::new(snapshot), LOCAL)
    }

    /// Build the version a committing transaction would carry: the
    /// generator's zero vector with the local coordinate advanced `coord`
    /// times, via the same `increment_local` step the commit protocol uses.
    fn version_at(generator: &VersionGenerator, coord: i64) -> VectorVersion {
        let mut v = generator.generate_new();
        for _ in 0..coord {
            v = generator.increment_local(&v, LOCAL).unwrap();
        }
        v
    }

    fn committed(tx: u64, version: VectorVersion, sub: u64) -> CommittedTransaction<String> {
        CommittedTransaction {
            tx_id: TxId(tx),
            version,
            sub_version: sub,
            modifications: Some(vec![format!("k{tx}")]),
            concurrent_clock: tx,
        }
    }

    #[test]
    fn single_node_commit_chain_advances_head() {
        let log = log(1);
        let generator = VersionGenerator::new(log.generator.snapshot().clone());

        let v1 = version_at(&generator, 1);
        let v2 = version_at(&generator, 2);
        let v3 = version_at(&generator, 3);

        log.insert_new_committed_versions(&[committed(1, v1, 0)])
            .unwrap();
        log.insert_new_committed_versions(&[committed(2, v2.clone(), 0)])
            .unwrap();
        log.insert_new_committed_versions(&[committed(3, v3, 0)])
            .unwrap();

        let current = log.get_current_version().unwrap();
        assert_eq!(current.get(LOCAL), 3);

        let at_most_2 = log.get_available_version_less_than(Some(&v2)).unwrap();
        assert_eq!(at_most_2.get(LOCAL), 2);
    }

    #[test]
    fn reader_unblocks_when_version_arrives() {
        let log = Arc::new(log(1));
        let generator = VersionGenerator::new(log.generator.snapshot().clone());
        let target = version_at(&generator, 7);

        let reader_log = Arc::clone(&log);
        let target_clone = target.clone();
        let reader = thread::spawn(move || reader_log.wait_for_version(&target_clone, None));

        thread::sleep(Duration::from_millis(20));
        log.insert_new_committed_versions(&[committed(1, target, 0)])
            .unwrap();

        assert!(reader.join().unwrap());
    }

    #[test]
    fn wait_for_version_zero_timeout_returns_immediately() {
        let log = log(1);
        let generator = VersionGenerator::new(log.generator.snapshot().clone());
        let target = version_at(&generator, 1);
        assert!(!log.wait_for_version(&target, Some(Duration::from_millis(0))));
    }

    #[test]
    fn get_available_version_less_than_null_equals_current() {
        let log = log(1);
        assert_eq!(
            log.get_available_version_less_than(None).unwrap(),
            log.get_current_version().unwrap()
        );
    }

    #[test]
    fn cross_node_entry_not_dominated_by_read_snapshot_is_hidden() {
        // Two-node snapshot (node 0 is local). One committed entry advances
        // past the reader's own read horizon on the *other* node's
        // coordinate; a second stays behind it.
        let snapshot = ClusterSnapshot::new(SnapshotId(1), vec![NodeId::new(0), NodeId::new(1)]);
        let log = CommitLog::new(VersionGenerator::new(snapshot.clone()), LOCAL);
        let generator = VersionGenerator::new(snapshot);

        let bump = |node: NodeId, times: i64, start: &VectorVersion| {
            let mut v = start.clone();
            for _ in 0..times {
                v = generator.increment_local(&v, node).unwrap();
            }
            v
        };

        let base = generator.generate_new();
        let ahead_on_other_node = bump(NodeId::new(1), 5, &bump(NodeId::new(0), 3, &base));
        let behind_on_other_node = bump(NodeId::new(1), 2, &bump(NodeId::new(0), 2, &base));
        let read_snapshot = bump(NodeId::new(1), 4, &bump(NodeId::new(0), 3, &base));

        log.insert_new_committed_versions(&[committed(1, ahead_on_other_node.clone(), 0)])
            .unwrap();
        log.insert_new_committed_versions(&[committed(2, behind_on_other_node.clone(), 0)])
            .unwrap();

        let read_version = log.get_read_version(Some(&read_snapshot)).unwrap();
        assert!(read_version.is_hidden(ahead_on_other_node.get(LOCAL), 0));
        assert!(!read_version.is_hidden(behind_on_other_node.get(LOCAL), 0));
    }

    #[test]
    fn dump_lists_newest_entry_first() {
        let log = log(1);
        let generator = VersionGenerator::new(log.generator.snapshot().clone());
        let v1 = version_at(&generator, 1);
        let v2 = version_at(&generator, 2);
        log.insert_new_committed_versions(&[committed(1, v1, 0)])
            .unwrap();
        log.insert_new_committed_versions(&[committed(2, v2, 0)])
            .unwrap();
        let dump = log.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2 ="));
        assert!(lines[1].starts_with("1 ="));
    }
}
