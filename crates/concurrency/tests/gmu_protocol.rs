//! End-to-end scenarios over the full GMU transactional core: commit log,
//! sorted transaction queue, commit manager, and the entry-wrapping
//! protocol working together.

use gmu_concurrency::{CommitLog, GmuTransaction, TransactionCommitManager, TransactionOutcome};
use gmu_core::collaborators::{ClockSource, DataContainer, DistributionManager};
use gmu_core::error::GmuResult;
use gmu_core::types::{ClusterSnapshot, NodeId, SnapshotId, TxId};
use gmu_core::version::{ReadVersion, VersionGenerator, WriteVersion};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct MonotonicClock(AtomicU64);

impl ClockSource for MonotonicClock {
    fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

struct SingleNodeDistribution;

impl DistributionManager<String> for SingleNodeDistribution {
    fn owners(&self, _key: &String) -> Vec<NodeId> {
        vec![NodeId::new(0)]
    }
    fn local_node(&self) -> NodeId {
        NodeId::new(0)
    }
}

/// An in-memory store whose `is_most_recent` check compares the coordinate
/// a key was last committed at against the reader's own snapshot
/// coordinate, so a write that lands after a transaction's snapshot was
/// taken is correctly reported as having moved the key out from under it.
struct ConflictAwareStore {
    values: Mutex<HashMap<String, (String, i64)>>,
}

impl ConflictAwareStore {
    fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }
}

impl DataContainer<String, String> for ConflictAwareStore {
    fn get(&self, key: &String, _read_version: &ReadVersion) -> GmuResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).map(|(v, _)| v.clone()))
    }

    fn is_most_recent(&self, key: &String, read_version: &ReadVersion) -> GmuResult<bool> {
        let guard = self.values.lock().unwrap();
        Ok(match guard.get(key) {
            None => true,
            Some((_, committed_coord)) => {
                *committed_coord <= read_version.vector().get(NodeId::new(0))
            }
        })
    }

    fn commit_entry(
        &self,
        key: &String,
        value: String,
        version: &WriteVersion,
        _skip_ownership_check: bool,
    ) -> GmuResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.clone(), (value, version.vector().get(NodeId::new(0))));
        Ok(())
    }
}

fn single_node_manager() -> Arc<TransactionCommitManager<String>> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let snapshot = ClusterSnapshot::new(SnapshotId(1), vec![NodeId::new(0)]);
    let generator = VersionGenerator::new(snapshot);
    let log = Arc::new(CommitLog::new(generator, NodeId::new(0)));
    Arc::new(TransactionCommitManager::new(
        log,
        Arc::new(MonotonicClock(AtomicU64::new(0))),
    ))
}

#[test]
fn sequential_writers_are_each_visible_to_the_next_reader() {
    let manager = single_node_manager();
    let store = Arc::new(ConflictAwareStore::new());
    let dist = Arc::new(SingleNodeDistribution);

    for (i, (key, value)) in [("a", "1"), ("b", "2"), ("c", "3")].into_iter().enumerate() {
        let mut tx = GmuTransaction::begin(
            TxId(i as u64 + 1),
            manager.clone(),
            store.clone() as Arc<dyn DataContainer<String, String>>,
            dist.clone() as Arc<dyn DistributionManager<String>>,
        )
        .unwrap();
        tx.write(key.to_string(), value.to_string()).unwrap();
        let outcome = tx.commit().unwrap();
        assert!(matches!(outcome, TransactionOutcome::Committed { .. }));
    }

    let mut reader = GmuTransaction::begin(
        TxId(2),
        manager,
        store as Arc<dyn DataContainer<String, String>>,
        dist as Arc<dyn DistributionManager<String>>,
    )
    .unwrap();
    assert_eq!(reader.read(&"a".to_string()).unwrap(), Some("1".to_string()));
    assert_eq!(reader.read(&"b".to_string()).unwrap(), Some("2".to_string()));
    assert_eq!(reader.read(&"c".to_string()).unwrap(), Some("3".to_string()));
}

#[test]
fn concurrent_writers_on_disjoint_keys_both_commit() {
    let manager = single_node_manager();
    let store = Arc::new(ConflictAwareStore::new());
    let dist = Arc::new(SingleNodeDistribution);

    let handles: Vec<_> = [("x", "1"), ("y", "2")]
        .into_iter()
        .enumerate()
        .map(|(i, (key, value))| {
            let manager = manager.clone();
            let store = store.clone();
            let dist = dist.clone();
            thread::spawn(move || {
                let mut tx = GmuTransaction::begin(
                    TxId(i as u64 + 1),
                    manager,
                    store as Arc<dyn DataContainer<String, String>>,
                    dist as Arc<dyn DistributionManager<String>>,
                )
                .unwrap();
                tx.write(key.to_string(), value.to_string()).unwrap();
                tx.commit().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(
            handle.join().unwrap(),
            TransactionOutcome::Committed { .. }
        ));
    }

    let current = manager.commit_log().get_current_version().unwrap();
    assert_eq!(current.get(NodeId::new(0)), 2);
}

#[test]
fn reader_blocks_until_concurrent_writer_installs_its_version() {
    let manager = single_node_manager();
    let store = Arc::new(ConflictAwareStore::new());
    let dist = Arc::new(SingleNodeDistribution);
    let commit_log = manager.commit_log().clone();

    let target = {
        let generator = commit_log.generator();
        generator.increment_local(&generator.generate_new(), NodeId::new(0)).unwrap()
    };

    let waiter_log = commit_log.clone();
    let target_clone = target.clone();
    let waiter = thread::spawn(move || waiter_log.wait_for_version(&target_clone, Some(Duration::from_secs(2))));

    thread::sleep(Duration::from_millis(30));
    let mut tx = GmuTransaction::begin(
        TxId(1),
        manager,
        store as Arc<dyn DataContainer<String, String>>,
        dist as Arc<dyn DistributionManager<String>>,
    )
    .unwrap();
    tx.write("k".to_string(), "v".to_string()).unwrap();
    tx.commit().unwrap();

    assert!(waiter.join().unwrap());
}

#[test]
fn read_write_conflict_aborts_the_later_committer() {
    let manager = single_node_manager();
    let store = Arc::new(ConflictAwareStore::new());
    let dist = Arc::new(SingleNodeDistribution);

    let mut reader_tx = GmuTransaction::begin(
        TxId(1),
        manager.clone(),
        store.clone() as Arc<dyn DataContainer<String, String>>,
        dist.clone() as Arc<dyn DistributionManager<String>>,
    )
    .unwrap();
    assert_eq!(reader_tx.read(&"shared".to_string()).unwrap(), None);

    let mut writer_tx = GmuTransaction::begin(
        TxId(2),
        manager.clone(),
        store.clone() as Arc<dyn DataContainer<String, String>>,
        dist.clone() as Arc<dyn DistributionManager<String>>,
    )
    .unwrap();
    writer_tx
        .write("shared".to_string(), "from tx2".to_string())
        .unwrap();
    writer_tx.commit().unwrap();

    reader_tx.write("other".to_string(), "ignored".to_string()).unwrap();
    let outcome = reader_tx.commit();
    assert!(matches!(outcome, Err(gmu_core::GmuError::ReadWriteConflict)));
}
