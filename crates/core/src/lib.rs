//! Core types for the GMU transactional core
//!
//! This crate defines the foundational, storage-agnostic pieces the
//! concurrency engine (`gmu-concurrency`) builds on:
//! - [`error`]: the typed error taxonomy
//! - [`types`]: node and cluster-snapshot identifiers
//! - [`version`]: vector versions, read/write versions, and the version
//!   generator
//! - [`collaborators`]: the external traits the core consumes — transport,
//!   data container, distribution manager, clock source

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collaborators;
pub mod error;
pub mod types;
pub mod version;

pub use error::{GmuError, GmuResult};
pub use types::{ClusterSnapshot, NodeId, SnapshotId, TxId};
pub use version::{ReadVersion, VectorVersion, VersionGenerator, VersionOrdering, WriteVersion};
