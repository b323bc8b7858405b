//! Git Shell Executor
//!
//! Runs the platform `git` binary for one transport verb against a repository
//! that must live strictly inside a storage root.
//!
//! ## Responsibilities
//! - **Validation**: allow-listed verb, contained path, both checked before spawn.
//! - **Streaming**: caller streams are copied to/from the child's stdio with bounded
//!   buffers, so backpressure from either side propagates to the other.
//! - **Lifecycle**: the child is always reaped; cancellation kills it.

use super::types::{GitError, GitVerb};

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// One transport request: which verb, against which repository.
#[derive(Debug, Clone)]
pub struct GitShellInvocation {
    pub verb: GitVerb,
    /// Storage root the repository must stay inside.
    pub root: PathBuf,
    /// Repository path, absolute or relative to `root`.
    pub path: PathBuf,
    /// Value of the client's `GIT_PROTOCOL` environment request.
    pub git_protocol: Option<String>,
}

pub struct GitShell {
    git_binary: PathBuf,
}

impl GitShell {
    pub fn new(git_binary: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }

    pub fn git_binary(&self) -> &Path {
        &self.git_binary
    }

    /// Runs `git <verb> <path>` with the given streams wired to its stdio.
    ///
    /// Returns once the process has exited and stdout/stderr are fully
    /// drained. The stdin copy is abandoned if the process exits first.
    pub async fn run<R, W, E>(
        &self,
        invocation: &GitShellInvocation,
        mut stdin: R,
        mut stdout: W,
        mut stderr: E,
        cancel: &CancellationToken,
    ) -> Result<(), GitError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let repo_path = resolve_within(&invocation.root, &invocation.path).await?;
        let subcommand = invocation.verb.subcommand();

        let mut command = Command::new(&self.git_binary);
        command.arg(subcommand);
        if invocation.verb == GitVerb::UploadPack {
            command.arg("--strict");
        }
        command
            .arg(&repo_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(protocol) = &invocation.git_protocol {
            command.env("GIT_PROTOCOL", protocol);
        }

        let mut child = command.spawn().map_err(|source| GitError::Spawn {
            subcommand: subcommand.to_string(),
            source,
        })?;
        tracing::debug!(
            verb = %invocation.verb,
            path = %repo_path.display(),
            pid = child.id(),
            "git process started"
        );

        let child_stdin = child.stdin.take();
        let (Some(mut child_stdout), Some(mut child_stderr)) =
            (child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child).await;
            return Err(stream_error(
                subcommand,
                io::Error::other("child stdio was not captured"),
            ));
        };

        let feed_stdin = async move {
            let Some(mut sink) = child_stdin else {
                return Ok(0);
            };
            let copied = tokio::io::copy(&mut stdin, &mut sink).await;
            // Dropping the pipe delivers EOF to the child.
            let _ = sink.shutdown().await;
            copied
        };
        let drain_stdout = async move {
            let copied = tokio::io::copy(&mut child_stdout, &mut stdout).await?;
            stdout.flush().await?;
            Ok::<u64, io::Error>(copied)
        };
        let drain_stderr = async move {
            let copied = tokio::io::copy(&mut child_stderr, &mut stderr).await?;
            stderr.flush().await?;
            Ok::<u64, io::Error>(copied)
        };
        let drains = async move { tokio::join!(drain_stdout, drain_stderr) };

        tokio::pin!(feed_stdin);
        tokio::pin!(drains);
        let mut stdin_open = true;

        let (stdout_result, stderr_result) = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(verb = %invocation.verb, "git process cancelled");
                    terminate(&mut child).await;
                    return Err(GitError::Interrupted { subcommand: subcommand.to_string() });
                }
                copied = &mut feed_stdin, if stdin_open => {
                    stdin_open = false;
                    match copied {
                        Ok(bytes) => tracing::trace!(bytes, "stdin closed"),
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                            tracing::debug!("git process closed stdin early");
                        }
                        Err(e) => tracing::debug!(error = %e, "stdin copy failed"),
                    }
                }
                drained = &mut drains => break drained,
            }
        };

        if let Err(e) = stdout_result.and(stderr_result) {
            tracing::warn!(verb = %invocation.verb, error = %e, "output stream failed, killing git process");
            terminate(&mut child).await;
            return Err(stream_error(subcommand, e));
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(GitError::Interrupted { subcommand: subcommand.to_string() });
            }
            status = child.wait() => status.map_err(|e| stream_error(subcommand, e))?,
        };

        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(GitError::Exited {
                subcommand: subcommand.to_string(),
                code,
            }),
            None => Err(GitError::Interrupted {
                subcommand: subcommand.to_string(),
            }),
        }
    }

    /// Runs an internal maintenance command (`init --bare`, `push --mirror`).
    /// Never reachable from a client command string.
    pub async fn admin<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        let output = Command::new(&self.git_binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                subcommand: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::Admin {
                args: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Resolves `path` against `root`, rejecting anything that could land
/// outside it: parent components, foreign absolute paths, symlink escapes.
pub async fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf, GitError> {
    let outside = || GitError::PathOutsideRoot(path.to_path_buf());

    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| outside())?
    } else {
        path
    };

    let mut has_segment = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => has_segment = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside());
            }
        }
    }
    if !has_segment {
        return Err(outside());
    }

    let candidate = root.join(relative);
    if let (Ok(real_root), Ok(real_path)) = (
        tokio::fs::canonicalize(root).await,
        tokio::fs::canonicalize(&candidate).await,
    ) && (!real_path.starts_with(&real_root) || real_path == real_root)
    {
        return Err(outside());
    }

    Ok(candidate)
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "git process already exited");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "failed to reap git process");
    }
}

fn stream_error(subcommand: &str, source: io::Error) -> GitError {
    GitError::Stream {
        subcommand: subcommand.to_string(),
        source,
    }
}
