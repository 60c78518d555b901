//! External collaborator traits
//!
//! The GMU core is a library, not a server: it consumes a *transport*, a
//! *data container*, a *distribution manager*, and a *clock source* as
//! traits and never owns a concrete implementation of any of them. Wire
//! format, persistence format, and cluster membership are all out of scope —
//! these traits exist purely as the seam the core calls through.

use crate::error::GmuResult;
use crate::types::NodeId;
use crate::version::{ReadVersion, WriteVersion};

/// Where a key's writes are owned: the set of nodes that must advance their
/// own vector coordinate for a transaction writing that key to commit.
pub trait DistributionManager<K>: Send + Sync {
    /// The write-owning nodes for `key` under the current cluster view.
    fn owners(&self, key: &K) -> Vec<NodeId>;

    /// Whether the local node owns `key`.
    fn local_node_is_owner(&self, key: &K) -> bool {
        self.owners(key).contains(&self.local_node())
    }

    /// This node's identity in the current cluster snapshot.
    fn local_node(&self) -> NodeId;
}

/// The versioned key/value store the GMU protocol reads from and commits
/// writes into. Persistence format and eviction policy are the
/// implementor's concern, not the core's.
pub trait DataContainer<K, V>: Send + Sync {
    /// Read the value visible at `read_version`, or `None` if the key has
    /// no value visible at that snapshot.
    fn get(&self, key: &K, read_version: &ReadVersion) -> GmuResult<Option<V>>;

    /// Whether the most-recently-committed value for `key` is visible at
    /// `read_version` — used by the entry-wrapping protocol's
    /// read-old-value-must-rollback check.
    fn is_most_recent(&self, key: &K, read_version: &ReadVersion) -> GmuResult<bool>;

    /// Durably apply a single committed write under `version`.
    ///
    /// `skip_ownership_check` lets remote replicas apply a write for a key
    /// they do not own (because the coordinator already validated
    /// ownership) by skipping the local ownership assertion.
    fn commit_entry(
        &self,
        key: &K,
        value: V,
        version: &WriteVersion,
        skip_ownership_check: bool,
    ) -> GmuResult<()>;
}

/// Sends and receives the prepare/commit/rollback messages that carry the
/// GMU protocol across the cluster. At-most-once delivery is not assumed;
/// duplicate commit delivery must be handled idempotently by `tx_id` at the
/// queue level, not by this trait.
pub trait Transport<M>: Send + Sync {
    /// Send `message` to a single peer.
    fn send(&self, to: NodeId, message: M) -> GmuResult<()>;

    /// Send `message` to every peer in the current cluster view.
    fn broadcast(&self, message: M) -> GmuResult<()>;
}

/// A monotonic local counter, used to stamp each prepared transaction with
/// its concurrent-clock tiebreaker.
pub trait ClockSource: Send + Sync {
    /// The next value from the monotonic counter. Never decreases and
    /// never repeats for a given `ClockSource` instance.
    fn tick(&self) -> u64;
}
