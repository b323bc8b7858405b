//! SSH listener and connection lifecycle.
//!
//! ## Shutdown
//! Cancelling the shutdown token stops the accept loop. Running sessions get
//! `grace` to finish on their own; after that the terminate token is
//! cancelled, which disconnects every session and kills its git processes.

use super::session::{SessionContext, SshSession};

use anyhow::{Context, Result};
use russh::MethodSet;
use russh::server::Config;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TERMINATE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub listen_addr: SocketAddr,
    pub inactivity_timeout: Option<Duration>,
    pub auth_rejection_time: Duration,
    pub shutdown_grace: Duration,
}

pub fn load_host_key(path: &Path) -> Result<russh_keys::key::KeyPair> {
    russh_keys::load_secret_key(path, None)
        .with_context(|| format!("failed to load SSH host key from {}", path.display()))
}

pub fn russh_config(settings: &SshSettings, host_key: russh_keys::key::KeyPair) -> Config {
    Config {
        inactivity_timeout: settings.inactivity_timeout,
        auth_rejection_time: settings.auth_rejection_time,
        auth_rejection_time_initial: Some(Duration::ZERO),
        methods: MethodSet::PUBLICKEY,
        keys: vec![host_key],
        ..Default::default()
    }
}

pub struct SshServer {
    config: Arc<Config>,
    context: Arc<SessionContext>,
    settings: SshSettings,
    /// Cancelled after the grace period; forces sessions down.
    terminate: CancellationToken,
}

impl SshServer {
    pub fn new(config: Config, context: Arc<SessionContext>, settings: SshSettings) -> Self {
        Self {
            config: Arc::new(config),
            context,
            settings,
            terminate: CancellationToken::new(),
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.settings.listen_addr)
            .await
            .with_context(|| format!("failed to bind SSH listener on {}", self.settings.listen_addr))
    }

    /// Accepts connections until `shutdown` is cancelled, then drains.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "SSH server listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "failed to set TCP_NODELAY");
            }
            self.spawn_connection(stream, peer);
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let session_cancel = self.terminate.child_token();
        let handler = SshSession::new(self.context.clone(), Some(peer), session_cancel);
        let session_id = handler.id();
        let config = self.config.clone();
        let terminate = self.terminate.clone();

        tracing::debug!(%session_id, %peer, "connection accepted");
        self.context.tracker.spawn(async move {
            let running = match russh::server::run_stream(config, stream, handler).await {
                Ok(running) => running,
                Err(e) => {
                    tracing::info!(%session_id, %peer, error = %e, "ssh handshake failed");
                    return;
                }
            };
            let handle = running.handle();
            tokio::pin!(running);

            tokio::select! {
                result = &mut running => {
                    if let Err(e) = result {
                        tracing::info!(%session_id, %peer, error = %e, "ssh session ended with error");
                    }
                }
                _ = terminate.cancelled() => {
                    tracing::info!(%session_id, %peer, "terminating ssh session");
                    let _ = handle
                        .disconnect(
                            russh::Disconnect::ByApplication,
                            "server shutting down".to_string(),
                            "en".to_string(),
                        )
                        .await;
                }
            }
        });
    }

    async fn drain(&self) {
        let tracker = &self.context.tracker;
        tracker.close();
        tracing::info!(active = tracker.len(), grace = ?self.settings.shutdown_grace, "draining ssh sessions");

        if tokio::time::timeout(self.settings.shutdown_grace, tracker.wait())
            .await
            .is_ok()
        {
            tracing::info!("all ssh sessions finished");
            return;
        }

        tracing::warn!(remaining = tracker.len(), "grace period expired, terminating sessions");
        self.terminate.cancel();
        if tokio::time::timeout(TERMINATE_WAIT, tracker.wait())
            .await
            .is_err()
        {
            tracing::error!(remaining = tracker.len(), "sessions still running after terminate");
        }
    }
}
