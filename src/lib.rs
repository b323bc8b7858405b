//! Git Hosting Transport and Storage Core
//!
//! This library crate defines the modules behind the `forge-cluster` binary:
//! an SSH endpoint for `git clone/fetch/push` and the storage layer that maps
//! repositories onto one or more storage nodes.
//!
//! ## Architecture Modules
//! - **`ssh`**: The SSH server. Public-key authentication, exec command parsing,
//!   per-channel execution and byte streaming between the client and git.
//! - **`access`**: Key-to-user lookup and repository authorization behind narrow traits,
//!   with a TOML-backed implementation.
//! - **`storage`**: Repository placement, failover, read-repair and background replication,
//!   plus the admin HTTP API.
//! - **`cluster`**: The storage node registry, the weighted consistent hash ring and the
//!   health monitor that decides which nodes may receive traffic.
//! - **`git`**: The allow-listed git subprocess executor with path containment.
//! - **`config`**: Layered configuration (defaults, file, environment).

pub mod access;
pub mod cluster;
pub mod config;
pub mod git;
pub mod ssh;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
