//! Vector versions, read/write versions, and the version generator
//!
//! A [`VectorVersion`] is an immutable per-node vector clock, always tagged
//! with the [`SnapshotId`] of the [`ClusterSnapshot`] it was generated
//! against — comparing or merging versions from different snapshots is a
//! hard error ([`GmuError::CrossSnapshot`]) rather than a silent projection.

use crate::error::{GmuError, GmuResult};
use crate::types::{ClusterSnapshot, NodeId, SnapshotId};
use std::collections::HashSet;
use std::sync::Arc;

/// Sentinel coordinate value meaning "this node did not exist in the
/// cluster snapshot this version was generated under".
pub const NON_EXISTING: i64 = -1;

/// Result of comparing two [`VectorVersion`]s under the vector partial
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    /// Strictly before: some shared coordinate is smaller and none larger.
    Before,
    /// Equal on every coordinate both versions define, but the other
    /// version defines additional coordinates this one does not.
    BeforeOrEqual,
    /// Identical on every coordinate.
    Equal,
    /// Strictly after: some shared coordinate is larger and none smaller.
    After,
    /// Equal on every coordinate both versions define, and this version
    /// defines additional coordinates the other does not.
    AfterOrEqual,
    /// Neither version happened-before the other.
    Concurrent,
}

/// An immutable per-node vector clock.
///
/// Coordinates are indexed by [`NodeId::index`]. A coordinate value of
/// [`NON_EXISTING`] means the node had not joined the cluster snapshot this
/// version was generated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorVersion {
    snapshot_id: SnapshotId,
    coords: Arc<[i64]>,
}

impl VectorVersion {
    fn new(snapshot_id: SnapshotId, coords: Vec<i64>) -> Self {
        Self {
            snapshot_id,
            coords: coords.into(),
        }
    }

    /// The cluster snapshot this version was generated against.
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    /// Number of coordinates (nodes) this version carries.
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// Whether this version has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// The counter for `node`, or [`NON_EXISTING`] if `node` is outside the
    /// range this version was generated with.
    pub fn get(&self, node: NodeId) -> i64 {
        self.coords.get(node.index()).copied().unwrap_or(NON_EXISTING)
    }

    fn require_same_snapshot(&self, other: &VectorVersion) -> GmuResult<()> {
        if self.snapshot_id != other.snapshot_id {
            return Err(GmuError::CrossSnapshot {
                a: self.snapshot_id,
                b: other.snapshot_id,
            });
        }
        Ok(())
    }

    /// Coordinate-wise maximum of `self` and every version in `others`,
    /// ignoring [`NON_EXISTING`] coordinates.
    ///
    /// `NON_EXISTING == -1` sorts below every real counter, so an ordinary
    /// `max` already has the right "ignore the sentinel" behavior as long
    /// as at least one operand defines the coordinate.
    ///
    /// # Errors
    /// [`GmuError::CrossSnapshot`] if any version is tagged with a
    /// different [`SnapshotId`] than `self`.
    pub fn merge_max<'a>(
        &self,
        others: impl IntoIterator<Item = &'a VectorVersion>,
    ) -> GmuResult<VectorVersion> {
        let mut coords = self.coords.to_vec();
        for other in others {
            self.require_same_snapshot(other)?;
            for (i, c) in coords.iter_mut().enumerate() {
                *c = (*c).max(other.get(NodeId::new(i as u32)));
            }
        }
        Ok(VectorVersion::new(self.snapshot_id, coords))
    }

    /// Compare `self` to `other` under the vector partial order.
    ///
    /// # Errors
    /// [`GmuError::CrossSnapshot`] if the two versions were generated
    /// under different cluster snapshots.
    pub fn compare(&self, other: &VectorVersion) -> GmuResult<VersionOrdering> {
        self.require_same_snapshot(other)?;

        let len = self.len().max(other.len());
        let mut any_lt = false;
        let mut any_gt = false;
        let mut self_only = false;
        let mut other_only = false;

        for i in 0..len {
            let node = NodeId::new(i as u32);
            let a = self.get(node);
            let b = other.get(node);
            match (a == NON_EXISTING, b == NON_EXISTING) {
                (true, true) => {}
                (true, false) => other_only = true,
                (false, true) => self_only = true,
                (false, false) => match a.cmp(&b) {
                    std::cmp::Ordering::Less => any_lt = true,
                    std::cmp::Ordering::Greater => any_gt = true,
                    std::cmp::Ordering::Equal => {}
                },
            }
        }

        Ok(match (any_lt, any_gt) {
            (true, true) => VersionOrdering::Concurrent,
            (true, false) => VersionOrdering::Before,
            (false, true) => VersionOrdering::After,
            (false, false) => match (self_only, other_only) {
                (false, false) => VersionOrdering::Equal,
                (true, false) => VersionOrdering::AfterOrEqual,
                (false, true) => VersionOrdering::BeforeOrEqual,
                (true, true) => VersionOrdering::Concurrent,
            },
        })
    }

    /// Wrap this version as a [`ReadVersion`] with an empty not-visible set.
    pub fn into_read_version(self) -> ReadVersion {
        ReadVersion {
            vector: self,
            not_visible: HashSet::new(),
        }
    }

    /// Wrap this version as a [`WriteVersion`] carrying an explicit
    /// sub-version tiebreaker.
    pub fn into_write_version(self, sub_version: u64) -> WriteVersion {
        WriteVersion {
            vector: self,
            sub_version,
        }
    }
}

/// A vector version plus the set of locally-installed but
/// globally-incomparable sub-versions a reader must skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadVersion {
    vector: VectorVersion,
    not_visible: HashSet<(i64, u64)>,
}

impl ReadVersion {
    /// The underlying snapshot vector.
    pub fn vector(&self) -> &VectorVersion {
        &self.vector
    }

    /// The not-visible `(node_counter, sub_version)` pairs this reader must
    /// skip.
    pub fn not_visible(&self) -> &HashSet<(i64, u64)> {
        &self.not_visible
    }

    /// Record a sub-version as not visible to this reader.
    pub fn mark_not_visible(&mut self, node_counter: i64, sub_version: u64) {
        self.not_visible.insert((node_counter, sub_version));
    }

    /// Whether `(node_counter, sub_version)` must be skipped by this
    /// reader.
    pub fn is_hidden(&self, node_counter: i64, sub_version: u64) -> bool {
        self.not_visible.contains(&(node_counter, sub_version))
    }
}

/// A vector version carrying an explicit sub-version, used to order
/// concurrently-committed transactions that share the same vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteVersion {
    vector: VectorVersion,
    sub_version: u64,
}

impl WriteVersion {
    /// The underlying vector.
    pub fn vector(&self) -> &VectorVersion {
        &self.vector
    }

    /// The sub-version tiebreaker.
    pub fn sub_version(&self) -> u64 {
        self.sub_version
    }
}

/// Produces and re-projects [`VectorVersion`]s against a fixed cluster
/// snapshot.
///
/// Constructed explicitly with the snapshot it generates against — no
/// deferred/lazy "enable" step; the generator simply must exist before the
/// commit log does.
#[derive(Debug, Clone)]
pub struct VersionGenerator {
    snapshot: ClusterSnapshot,
}

impl VersionGenerator {
    /// Build a generator for the given cluster snapshot.
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        Self { snapshot }
    }

    /// The cluster snapshot this generator produces versions against.
    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    /// A fresh vector version with every coordinate at zero.
    pub fn generate_new(&self) -> VectorVersion {
        VectorVersion::new(self.snapshot.id(), vec![0; self.snapshot.len()])
    }

    /// Re-project `v` onto this generator's cluster snapshot: existing
    /// coordinates are preserved, coordinates for nodes that joined after
    /// `v` was generated are filled with [`NON_EXISTING`].
    ///
    /// # Errors
    /// [`GmuError::IllegalState`] if `v` already carries more coordinates
    /// than this snapshot has — cluster snapshots only grow, so a version
    /// can never need to be projected onto a *smaller* one.
    pub fn updated_version(&self, v: &VectorVersion) -> GmuResult<VectorVersion> {
        if v.len() > self.snapshot.len() {
            return Err(GmuError::IllegalState(format!(
                "cannot project a {}-coordinate version onto a {}-node snapshot",
                v.len(),
                self.snapshot.len()
            )));
        }
        let mut coords = vec![NON_EXISTING; self.snapshot.len()];
        for (i, c) in coords.iter_mut().enumerate().take(v.len()) {
            *c = v.get(NodeId::new(i as u32));
        }
        Ok(VectorVersion::new(self.snapshot.id(), coords))
    }

    /// Coordinate-wise maximum of one or more versions, all of which must
    /// already share this generator's snapshot.
    ///
    /// # Panics
    /// Panics if `versions` is empty — there is no identity element to
    /// return.
    pub fn merge_and_max<'a>(
        &self,
        versions: impl IntoIterator<Item = &'a VectorVersion>,
    ) -> GmuResult<VectorVersion> {
        let mut iter = versions.into_iter();
        let first = iter.next().expect("merge_and_max requires at least one version");
        first.merge_max(iter)
    }

    /// Wrap `v` as a [`ReadVersion`] with an empty not-visible set.
    pub fn convert_to_read(&self, v: VectorVersion) -> ReadVersion {
        v.into_read_version()
    }

    /// Wrap `v` as a [`WriteVersion`] carrying `sub_version`.
    pub fn convert_to_write(&self, v: VectorVersion, sub_version: u64) -> WriteVersion {
        v.into_write_version(sub_version)
    }

    /// Advance `node`'s coordinate in `v` by one, leaving every other
    /// coordinate unchanged — how a coordinating node computes its own next
    /// commit version from the version it read at.
    ///
    /// # Errors
    /// [`GmuError::CrossSnapshot`] if `v` was generated under a different
    /// snapshot than this generator. [`GmuError::IllegalState`] if `node` is
    /// not a member of this generator's snapshot.
    pub fn increment_local(&self, v: &VectorVersion, node: NodeId) -> GmuResult<VectorVersion> {
        if v.snapshot_id() != self.snapshot.id() {
            return Err(GmuError::CrossSnapshot {
                a: v.snapshot_id(),
                b: self.snapshot.id(),
            });
        }
        if node.index() >= self.snapshot.len() {
            return Err(GmuError::IllegalState(format!(
                "{node} is not a member of this generator's snapshot"
            )));
        }
        let mut coords = vec![NON_EXISTING; self.snapshot.len()];
        for (i, c) in coords.iter_mut().enumerate() {
            *c = v.get(NodeId::new(i as u32));
        }
        let idx = node.index();
        coords[idx] = coords[idx].max(0) + 1;
        Ok(VectorVersion::new(self.snapshot.id(), coords))
    }
}
