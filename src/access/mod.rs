//! Access Adapter Module
//!
//! Answers the two questions the transport asks before touching storage:
//! who owns this key, and may this user read or write this repository.
//!
//! ## Submodules
//! - **`adapter`**: The `KeyStore` and `RepositoryAccess` capability traits.
//! - **`static_acl`**: A TOML-file implementation of both, reloadable at runtime.
//! - **`types`**: Identities, access levels and SSH key fingerprints.

pub mod adapter;
pub mod static_acl;
pub mod types;

pub use adapter::{KeyStore, RepositoryAccess};
pub use static_acl::StaticAccessList;
pub use types::{AccessError, AccessLevel, UserIdentity};

#[cfg(test)]
mod tests;
