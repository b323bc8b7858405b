//! Storage Cluster Module
//!
//! Tracks the physical storage nodes and decides which of them hold a given repository.
//!
//! ## Core Mechanisms
//! - **Registry**: The configured storage nodes (id, address, weight, root) and their health.
//! - **Hash Ring**: Weighted virtual nodes on a 64-bit ring; a repository key maps to the
//!   first N distinct healthy nodes clockwise from its hash. Rebuilt wholesale and swapped atomically.
//! - **Health Monitor**: Periodic concurrent probes with a per-probe timeout. Slow failure
//!   (N consecutive misses), fast recovery (one success).

pub mod health;
pub mod placement;
pub mod probe;
pub mod registry;
pub mod ring;
pub mod types;

pub use health::{HealthConfig, HealthMonitor};
pub use placement::{Cluster, PlacementStrategy};
pub use types::{NodeId, NodeSpec, StorageNode};
