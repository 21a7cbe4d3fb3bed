//! Checkpoint management for epoch jobs
//!
//! Provides the checkpoint file format, the per-node and multi-node
//! snapshot managers that build save/load tasks, and checkpoint discovery
//! for picking a resume point.

pub mod catalog;
pub mod codec;
pub mod manager;
pub mod multi_node;

pub use catalog::{latest_epoch, list_epochs, prune};
pub use codec::{read_checkpoint, write_checkpoint, BlobMap, CheckpointHeader, CheckpointMetadata};
pub use manager::{NodeSnapshot, SnapshotController, SnapshotManager, BLOB_NAMES};
pub use multi_node::{node_prefix, MultiNodeSnapshotManager, NodeManagerFactory};
