//! SSH session handler implementing the `russh` 0.46 [`Handler`] trait.
//!
//! One `SshSession` exists per TCP connection. It authenticates by public key
//! only, tracks each session channel separately and hands accepted git
//! commands to a background task. That task also reads the channel's client
//! data into a bounded pipe, so the handler itself never waits on git.

use super::bridge::{PIPE_CAPACITY, RusshChannel};
use super::command::parse_git_command;
use super::exec::{ExecRequest, GitTransport};
use crate::access::types::fingerprint_of_blob;
use crate::access::{KeyStore, UserIdentity};

use base64::Engine as _;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Collaborators shared by every session of a server.
pub struct SessionContext {
    pub key_store: Arc<dyn KeyStore>,
    pub transport: Arc<GitTransport>,
    pub tracker: TaskTracker,
}

#[derive(Default)]
struct ChannelState {
    git_protocol: Option<String>,
    /// Taken by the exec task; `None` once a command runs.
    channel: Option<Channel<Msg>>,
    executing: bool,
    cancel: CancellationToken,
}

pub struct SshSession {
    context: Arc<SessionContext>,
    id: Uuid,
    peer: Option<SocketAddr>,
    user: Option<UserIdentity>,
    channels: HashMap<ChannelId, ChannelState>,
    /// Cancelled when the connection goes away; parent of every channel token.
    cancel: CancellationToken,
}

impl SshSession {
    pub fn new(
        context: Arc<SessionContext>,
        peer: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context,
            id: Uuid::new_v4(),
            peer,
            user: None,
            channels: HashMap::new(),
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::debug!(session_id = %self.id, "ssh session closed");
    }
}

/// `SHA256:<base64>` fingerprint of an SSH public key, as `ssh-keygen -l` prints it.
pub fn fingerprint_of(key: &PublicKey) -> Option<String> {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(key.public_key_base64().as_bytes())
        .ok()?;
    Some(fingerprint_of_blob(&blob))
}

fn finish_channel(session: &mut Session, channel: ChannelId, exit_status: u32) {
    session.exit_status_request(channel, exit_status);
    session.eof(channel);
    session.close(channel);
}

fn reject_channel(session: &mut Session, channel: ChannelId, message: &str) {
    session.extended_data(channel, 1, CryptoVec::from_slice(message.as_bytes()));
    finish_channel(session, channel, 1);
}

/// Copies client data into the command's stdin until the client closes the
/// channel. Writes wait while the pipe is full. After EOF or a failed write
/// the remaining messages are drained and discarded.
async fn forward_client_input(mut channel: Channel<Msg>, stdin: DuplexStream) {
    let mut stdin = Some(stdin);
    while let Some(message) = channel.wait().await {
        match message {
            ChannelMsg::Data { data } => {
                if let Some(writer) = stdin.as_mut()
                    && let Err(e) = writer.write_all(&data).await
                {
                    tracing::debug!(channel = ?channel.id(), error = %e, "stdin closed by command");
                    stdin = None;
                }
            }
            ChannelMsg::Eof => stdin = None,
            ChannelMsg::Close => return,
            _ => {}
        }
    }
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let reject = Auth::Reject {
            proceed_with_methods: None,
        };
        let Some(fingerprint) = fingerprint_of(key) else {
            tracing::warn!(session_id = %self.id, peer = ?self.peer, "undecodable public key offered");
            return Ok(reject);
        };

        match self.context.key_store.user_by_fingerprint(&fingerprint).await {
            Ok(Some(identity)) => {
                tracing::info!(
                    session_id = %self.id,
                    peer = ?self.peer,
                    login = user,
                    username = %identity.username,
                    fingerprint = %fingerprint,
                    "public key accepted"
                );
                self.user = Some(identity);
                Ok(Auth::Accept)
            }
            Ok(None) => {
                tracing::info!(session_id = %self.id, peer = ?self.peer, fingerprint = %fingerprint, "unknown public key");
                Ok(reject)
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, fingerprint = %fingerprint, error = %e, "key lookup failed");
                Ok(reject)
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let state = ChannelState {
            channel: Some(channel),
            cancel: self.cancel.child_token(),
            ..ChannelState::default()
        };
        self.channels.insert(id, state);
        Ok(true)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL"
            && let Some(state) = self.channels.get_mut(&channel)
        {
            tracing::debug!(session_id = %self.id, value = variable_value, "captured GIT_PROTOCOL");
            state.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let raw = String::from_utf8_lossy(data);
        let Some(state) = self.channels.get_mut(&channel) else {
            tracing::warn!(session_id = %self.id, ?channel, "exec on unknown channel");
            session.channel_failure(channel);
            return Ok(());
        };
        if state.executing {
            tracing::warn!(session_id = %self.id, ?channel, "second exec on channel");
            session.channel_failure(channel);
            return Ok(());
        }
        let Some(user) = self.user.clone() else {
            session.channel_failure(channel);
            return Ok(());
        };

        let command = match parse_git_command(&raw) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(session_id = %self.id, user = %user.username, command = %raw, error = %e, "rejected exec request");
                state.channel = None;
                session.channel_success(channel);
                reject_channel(session, channel, &format!("{}\n", e));
                return Ok(());
            }
        };

        let Some(client) = state.channel.take() else {
            session.channel_failure(channel);
            return Ok(());
        };
        session.channel_success(channel);
        let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
        state.executing = true;

        let request = ExecRequest {
            session_id: self.id,
            user,
            command,
            git_protocol: state.git_protocol.clone(),
        };
        let output = RusshChannel::new(session.handle(), &client);
        let transport = self.context.transport.clone();
        let cancel = state.cancel.clone();
        let session_id = self.id;

        self.context.tracker.spawn(async move {
            let feed = forward_client_input(client, stdin_writer);
            let run = transport.execute(request, stdin_reader, &output, &cancel);
            tokio::pin!(feed, run);
            let status = tokio::select! {
                status = &mut run => status,
                _ = &mut feed => run.await,
            };
            tracing::debug!(%session_id, ?channel, status, "channel finished");
        });
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.remove(&channel) {
            state.cancel.cancel();
        }
        Ok(())
    }
}
