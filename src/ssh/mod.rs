//! SSH Git Transport Module
//!
//! Accepts SSH connections, authenticates by public key and runs the three
//! git transport commands against repositories chosen by the storage layer.
//!
//! ## Submodules
//! - **`command`**: Exec string grammar and allow-list check.
//! - **`session`**: The per-connection `russh` handler; tracks channels and feeds client data to git.
//! - **`exec`**: Resolve, authorize, open, run: one accepted command from start to exit status.
//! - **`bridge`**: Pumps git's stdout/stderr into the channel, waiting on the client's window.
//! - **`server`**: Listener, connection tasks and graceful shutdown.

pub mod bridge;
pub mod command;
pub mod exec;
pub mod server;
pub mod session;

pub use command::{CommandError, GitCommand, parse_git_command};
pub use exec::GitTransport;
pub use server::{SshServer, SshSettings};
pub use session::SessionContext;
