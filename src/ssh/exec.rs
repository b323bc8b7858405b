//! Execution of one accepted git command on a channel.
//!
//! Order is fixed: resolve the repository, authorize, open storage, run git.
//! Nothing is spawned until every earlier step has succeeded.

use super::bridge::{ChannelOutput, run_bridged};
use super::command::GitCommand;
use crate::access::{AccessError, AccessLevel, RepositoryAccess, UserIdentity};
use crate::git::{GitError, GitShell, GitShellInvocation};
use crate::storage::{GitStorage, StorageError};

use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shown for unknown repositories and for denied access alike.
pub const NOT_FOUND_MESSAGE: &str = "repository not found\n";
pub const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable, please retry\n";
const INTERNAL_MESSAGE: &str = "internal server error\n";

pub struct ExecRequest {
    pub session_id: Uuid,
    pub user: UserIdentity,
    pub command: GitCommand,
    pub git_protocol: Option<String>,
}

pub struct GitTransport {
    access: Arc<dyn RepositoryAccess>,
    storage: Arc<dyn GitStorage>,
    shell: Arc<GitShell>,
}

impl GitTransport {
    pub fn new(
        access: Arc<dyn RepositoryAccess>,
        storage: Arc<dyn GitStorage>,
        shell: Arc<GitShell>,
    ) -> Self {
        Self {
            access,
            storage,
            shell,
        }
    }

    /// Serves the request and finishes the channel. Returns the exit status
    /// sent to the client.
    pub async fn execute<O>(
        &self,
        request: ExecRequest,
        stdin: DuplexStream,
        output: &O,
        cancel: &CancellationToken,
    ) -> u32
    where
        O: ChannelOutput + ?Sized,
    {
        let status = self.serve(&request, stdin, output, cancel).await;
        output.finish(status).await;
        status
    }

    async fn serve<O>(
        &self,
        request: &ExecRequest,
        stdin: DuplexStream,
        output: &O,
        cancel: &CancellationToken,
    ) -> u32
    where
        O: ChannelOutput + ?Sized,
    {
        let ExecRequest {
            session_id,
            user,
            command,
            git_protocol,
        } = request;
        let verb = command.verb;

        let key = match self.access.resolve_repository_key(&command.path).await {
            Ok(key) => key,
            Err(e) => {
                match &e {
                    AccessError::Backend(_) => {
                        tracing::error!(%session_id, user = %user.username, error = %e, "repository lookup failed")
                    }
                    _ => {
                        tracing::info!(%session_id, user = %user.username, path = %command.path, reason = %e, "repository not resolved")
                    }
                }
                return reject(output, NOT_FOUND_MESSAGE).await;
            }
        };

        let level = if verb.is_write() {
            AccessLevel::Write
        } else {
            AccessLevel::Read
        };
        match self.access.authorize(user, &key, level).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%session_id, user = %user.username, repository = %key, %level, "access denied");
                return reject(output, NOT_FOUND_MESSAGE).await;
            }
            Err(e) => {
                tracing::error!(%session_id, user = %user.username, repository = %key, error = %e, "authorization failed");
                return reject(output, NOT_FOUND_MESSAGE).await;
            }
        }

        let opened = match self.storage.open_repository(&key).await {
            Ok(opened) => opened,
            Err(e) if e.is_retryable() => {
                tracing::warn!(%session_id, repository = %key, error = %e, "storage unavailable");
                return reject(output, UNAVAILABLE_MESSAGE).await;
            }
            Err(e @ StorageError::RepositoryNotFound(_)) => {
                tracing::warn!(%session_id, repository = %key, error = %e, "repository missing from storage");
                return reject(output, NOT_FOUND_MESSAGE).await;
            }
            Err(e) => {
                tracing::error!(%session_id, repository = %key, error = %e, "storage error");
                return reject(output, INTERNAL_MESSAGE).await;
            }
        };

        let invocation = GitShellInvocation {
            verb,
            root: opened.root.clone(),
            path: opened.path.clone(),
            git_protocol: git_protocol.clone(),
        };
        tracing::info!(
            %session_id,
            user = %user.username,
            repository = %key,
            %verb,
            node = %opened.node,
            "executing git command"
        );

        match run_bridged(&self.shell, &invocation, stdin, output, cancel).await {
            Ok(()) => {
                if verb.is_write() {
                    self.storage.repository_written(&opened);
                }
                0
            }
            Err(e) => {
                let status = e.exit_status();
                match &e {
                    GitError::Exited { .. } => {
                        tracing::info!(%session_id, repository = %key, %verb, status, "git exited with failure");
                    }
                    GitError::Interrupted { .. } => {
                        tracing::info!(%session_id, repository = %key, %verb, "git interrupted");
                    }
                    _ => {
                        tracing::error!(%session_id, repository = %key, %verb, error = %e, "git execution failed");
                        let _ = output.stderr(INTERNAL_MESSAGE.as_bytes()).await;
                    }
                }
                status
            }
        }
    }
}

async fn reject<O>(output: &O, message: &str) -> u32
where
    O: ChannelOutput + ?Sized,
{
    let _ = output.stderr(message.as_bytes()).await;
    1
}
