//! Byte plumbing between an SSH channel and a git process.
//!
//! The executor writes into in-memory pipes; one pump per pipe forwards
//! chunks to the channel as data (stdout) or extended data type 1 (stderr).
//! Pipes are bounded and channel writes wait for the client's SSH window,
//! so a slow client stalls git instead of growing a buffer.

use crate::git::{GitError, GitShell, GitShellInvocation};

use async_trait::async_trait;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId};
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Capacity of each in-memory pipe between the channel and git.
pub const PIPE_CAPACITY: usize = 256 * 1024;
const CHUNK_SIZE: usize = 32 * 1024;

/// SSH extended data type for stderr.
pub const EXTENDED_STDERR: u32 = 1;

/// Where the output side of an executing channel goes.
#[async_trait]
pub trait ChannelOutput: Send + Sync {
    /// Completes once the bytes are handed to the transport; may wait for
    /// the peer to make room.
    async fn data(&self, bytes: &[u8]) -> io::Result<()>;

    async fn stderr(&self, bytes: &[u8]) -> io::Result<()>;

    /// Sends exit-status, EOF and close, in that order.
    async fn finish(&self, exit_status: u32);
}

type ChannelWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Output side of a russh session channel.
///
/// Data goes through the channel's own writers, which only send what the
/// client's window allows. Exit status, EOF and close go through the
/// session `Handle`; both share the session's message queue, so they are
/// sent after any data already written.
pub struct RusshChannel {
    handle: Handle,
    id: ChannelId,
    stdout: Mutex<ChannelWriter>,
    stderr: Mutex<ChannelWriter>,
}

impl RusshChannel {
    pub fn new(handle: Handle, channel: &Channel<Msg>) -> Self {
        Self {
            handle,
            id: channel.id(),
            stdout: Mutex::new(Box::pin(channel.make_writer())),
            stderr: Mutex::new(Box::pin(channel.make_writer_ext(Some(EXTENDED_STDERR)))),
        }
    }
}

async fn write_through(writer: &Mutex<ChannelWriter>, bytes: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[async_trait]
impl ChannelOutput for RusshChannel {
    async fn data(&self, bytes: &[u8]) -> io::Result<()> {
        write_through(&self.stdout, bytes).await
    }

    async fn stderr(&self, bytes: &[u8]) -> io::Result<()> {
        write_through(&self.stderr, bytes).await
    }

    async fn finish(&self, exit_status: u32) {
        for writer in [&self.stdout, &self.stderr] {
            let _ = writer.lock().await.flush().await;
        }
        if self
            .handle
            .exit_status_request(self.id, exit_status)
            .await
            .is_err()
        {
            tracing::debug!(channel = ?self.id, "channel gone before exit status");
            return;
        }
        let _ = self.handle.eof(self.id).await;
        let _ = self.handle.close(self.id).await;
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn pump<R, O>(mut reader: R, output: &O, stream: Stream) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    O: ChannelOutput + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        match stream {
            Stream::Stdout => output.data(&buf[..n]).await?,
            Stream::Stderr => output.stderr(&buf[..n]).await?,
        }
        total += n as u64;
    }
}

/// Runs git with `stdin` as its input and the channel as its output.
///
/// Returns once git has exited and everything it wrote has been handed to
/// the channel. Does not finish the channel. If the channel stops accepting
/// output, git is killed.
pub async fn run_bridged<O>(
    shell: &GitShell,
    invocation: &GitShellInvocation,
    stdin: DuplexStream,
    output: &O,
    cancel: &CancellationToken,
) -> Result<(), GitError>
where
    O: ChannelOutput + ?Sized,
{
    let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let local_cancel = cancel.child_token();

    let exec = shell.run(invocation, stdin, stdout_writer, stderr_writer, &local_cancel);
    let forward = |reader: DuplexStream, stream: Stream| {
        let local_cancel = &local_cancel;
        async move {
            let pumped = pump(reader, output, stream).await;
            if let Err(e) = &pumped {
                tracing::debug!(error = %e, "channel output failed, stopping git");
                local_cancel.cancel();
            }
            pumped
        }
    };

    let (result, stdout, stderr) = tokio::join!(
        exec,
        forward(stdout_reader, Stream::Stdout),
        forward(stderr_reader, Stream::Stderr),
    );
    if let (Ok(stdout_bytes), Ok(stderr_bytes)) = (stdout, stderr) {
        tracing::debug!(stdout_bytes, stderr_bytes, "channel output drained");
    }
    result
}
