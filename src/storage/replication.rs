//! Background repository replication.
//!
//! Jobs are queued on a bounded channel and executed by a single worker.
//! Each target gets `git init --bare` when it has no copy yet, then a
//! `git push --mirror` from the source. A target that keeps failing is
//! reported to the health monitor once its retries are exhausted.

use super::types::{RepositoryKey, StorageError};
use crate::cluster::{Cluster, HealthMonitor, NodeId};
use crate::git::GitShell;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_REPLICATION_ATTEMPTS: usize = 5;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(150);

/// Copy `key` from `source` onto every node in `targets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationJob {
    pub key: RepositoryKey,
    pub source: NodeId,
    pub targets: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_REPLICATION_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_INITIAL_BACKOFF * 8,
        }
    }
}

/// Sending half of the replication queue.
#[derive(Clone)]
pub struct Replicator {
    sender: mpsc::Sender<ReplicationJob>,
}

impl Replicator {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReplicationJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues a job without waiting. A full or closed queue drops the job;
    /// the next write or read-repair schedules it again.
    pub fn schedule(&self, job: ReplicationJob) -> bool {
        if job.targets.is_empty() {
            return false;
        }

        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(key = %job.key, "replication queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(key = %job.key, "replication worker stopped, job dropped");
                false
            }
        }
    }
}

pub struct ReplicationWorker {
    cluster: Arc<Cluster>,
    shell: Arc<GitShell>,
    monitor: Option<Arc<HealthMonitor>>,
    config: ReplicationConfig,
}

impl ReplicationWorker {
    pub fn new(
        cluster: Arc<Cluster>,
        shell: Arc<GitShell>,
        monitor: Option<Arc<HealthMonitor>>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            cluster,
            shell,
            monitor,
            config,
        }
    }

    pub fn spawn(
        self,
        receiver: mpsc::Receiver<ReplicationJob>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(receiver, shutdown).await })
    }

    async fn run(self, mut receiver: mpsc::Receiver<ReplicationJob>, shutdown: CancellationToken) {
        tracing::info!("replication worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let pending = receiver.len();
                    if pending > 0 {
                        tracing::warn!(pending, "replication worker stopping with queued jobs");
                    }
                    break;
                }
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    self.replicate(&job).await;
                }
            }
        }
        tracing::info!("replication worker stopped");
    }

    /// Runs one job to completion. Returns the number of targets brought
    /// up to date.
    pub async fn replicate(&self, job: &ReplicationJob) -> usize {
        let source_path = match self.repository_path(&job.source, &job.key) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(key = %job.key, source = %job.source, error = %e, "replication source unavailable");
                return 0;
            }
        };

        let mut replicated = 0;
        for target in job.targets.iter().filter(|target| **target != job.source) {
            match self.replicate_with_retry(&source_path, &job.key, target).await {
                Ok(()) => {
                    replicated += 1;
                    tracing::info!(key = %job.key, source = %job.source, target = %target, "repository replicated");
                }
                Err(e) => {
                    tracing::error!(key = %job.key, target = %target, error = %e, "replication failed, giving up");
                    if let Some(monitor) = &self.monitor {
                        monitor.report_failure(target, "replication retries exhausted");
                    }
                }
            }
        }
        replicated
    }

    async fn replicate_with_retry(
        &self,
        source_path: &Path,
        key: &RepositoryKey,
        target: &NodeId,
    ) -> Result<(), StorageError> {
        let attempts = self.config.attempts.max(1);
        let mut delay = self.config.initial_backoff;

        for attempt in 0..attempts {
            match self.replicate_once(source_path, key, target).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(e);
                    }
                    tracing::debug!(key = %key, target = %target, attempt, error = %e, "replication attempt failed");
                    let jitter = Duration::from_millis(rand::random::<u64>() % 50);
                    tokio::time::sleep(delay + jitter).await;
                    delay = (delay * 2).min(self.config.max_backoff);
                }
            }
        }

        Err(StorageError::NodeUnreachable(target.clone()))
    }

    async fn replicate_once(
        &self,
        source_path: &Path,
        key: &RepositoryKey,
        target: &NodeId,
    ) -> Result<(), StorageError> {
        let target_root = self.node_root(target)?;
        if tokio::fs::metadata(&target_root).await.is_err() {
            return Err(StorageError::NodeUnreachable(target.clone()));
        }

        let target_path = target_root.join(key.relative_path());
        if !has_repository(&target_path).await {
            if let Some(parent) = target_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.shell
                .admin([
                    OsStr::new("init"),
                    OsStr::new("--bare"),
                    OsStr::new("--quiet"),
                    target_path.as_os_str(),
                ])
                .await?;
        }

        // An empty source has nothing to mirror; the init above is the copy.
        let refs = self
            .shell
            .admin([
                OsStr::new("--git-dir"),
                source_path.as_os_str(),
                OsStr::new("for-each-ref"),
                OsStr::new("--count=1"),
            ])
            .await?;
        if refs.trim().is_empty() {
            return Ok(());
        }

        self.shell
            .admin([
                OsStr::new("--git-dir"),
                source_path.as_os_str(),
                OsStr::new("push"),
                OsStr::new("--mirror"),
                OsStr::new("--quiet"),
                target_path.as_os_str(),
            ])
            .await?;
        Ok(())
    }

    fn node_root(&self, id: &NodeId) -> Result<PathBuf, StorageError> {
        self.cluster
            .registry()
            .get(id)
            .map(|node| node.root)
            .ok_or_else(|| StorageError::UnknownNode(id.clone()))
    }

    fn repository_path(&self, id: &NodeId, key: &RepositoryKey) -> Result<PathBuf, StorageError> {
        Ok(self.node_root(id)?.join(key.relative_path()))
    }
}

/// A bare repository is present when its `HEAD` is a regular file.
pub async fn has_repository(path: &Path) -> bool {
    tokio::fs::metadata(path.join("HEAD"))
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
