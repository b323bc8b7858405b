//! Repository Storage Module
//!
//! Maps repository keys to bare repositories on disk, either in a single
//! directory or across the storage nodes of a cluster.
//!
//! ## Core Concepts
//! - **Placement**: The cluster's hash ring picks the primary and replicas of each repository.
//! - **Failover**: Reads walk the placement past nodes that lack a copy or cannot be reached.
//! - **Replication**: Creates, pushes and read-repairs enqueue mirror jobs for a background worker.
//! - **Admin API**: Read-only HTTP views of node health and repository placement.

pub mod handlers;
pub mod protocol;
pub mod replication;
pub mod service;
pub mod types;

pub use service::{DistributedGitStorage, GitStorage, LocalGitStorage};
pub use types::{OpenedRepository, Placement, RepositoryKey, StorageError};

#[cfg(test)]
mod tests;
