//! Node and cluster-snapshot identifiers
//!
//! Vector version coordinates index a dense integer 0…N-1 for some cluster
//! snapshot. This module defines the two identifier types that carry that
//! mapping, plus the transaction identifier used to key the sorted
//! transaction queue.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A dense per-cluster-snapshot node index.
///
/// `NodeId` is positional, not a durable cluster-wide identity — the same
/// physical node may map to a different `NodeId` in a later
/// [`ClusterSnapshot`] after a view change. Membership/view-change tracking
/// is out of scope for this type; it only records the coordinate a
/// [`crate::version::VectorVersion`] uses to index into its vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Construct a `NodeId` from its dense index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The dense index this node occupies in its cluster snapshot.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifies which [`ClusterSnapshot`] a vector version was generated
/// against.
///
/// Two vector versions are only comparable when they carry the same
/// `SnapshotId` — comparing across cluster snapshots would require a
/// canonical projection. This core does not implement `project_onto` — the
/// generator simply refuses to compare across snapshots
/// ([`crate::error::GmuError::CrossSnapshot`]) rather than silently
/// reprojecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

/// The list of node identifiers that existed when a [`SnapshotId`] was
/// minted.
///
/// Ordered: a node's position in `members` is its [`NodeId`] index. Cheaply
/// cloneable (`Arc<[NodeId]>`) since every [`crate::version::VectorVersion`]
/// generated under a snapshot shares the same member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    id: SnapshotId,
    members: Arc<[NodeId]>,
}

impl ClusterSnapshot {
    /// Build a cluster snapshot from an explicit, ordered member list.
    pub fn new(id: SnapshotId, members: impl Into<Arc<[NodeId]>>) -> Self {
        Self {
            id,
            members: members.into(),
        }
    }

    /// The snapshot tag used to guard cross-snapshot comparisons.
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Number of nodes (coordinates) in this snapshot.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether this snapshot has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The ordered member list; position is the node's dense index.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }
}

/// Unique identifier for a transaction, used to key the sorted transaction
/// queue and to dedupe idempotent commit delivery — redelivered commit
/// batches for an already-applied `tx_id` must be no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}
