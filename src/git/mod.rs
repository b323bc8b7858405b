//! Git Shell Module
//!
//! Bridges transport requests to the native `git` binary.
//!
//! ## Submodules
//! - **`types`**: The allow-listed transport verbs and the executor error type.
//! - **`executor`**: Spawns `git upload-pack|receive-pack|upload-archive`, validates the
//!   repository path, streams stdio and reports the exit status.

pub mod executor;
pub mod types;

pub use executor::{GitShell, GitShellInvocation};
pub use types::{GitError, GitVerb};
