//! Repository storage service.
//!
//! `GitStorage` hides whether repositories live in one directory or are
//! spread over a cluster of storage nodes. Callers resolve, open and
//! create repositories the same way in both modes.

use super::replication::{ReplicationJob, Replicator, has_repository};
use super::types::{OpenedRepository, Placement, RepositoryKey, StorageError};
use crate::cluster::{Cluster, NodeId};
use crate::git::GitShell;

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait GitStorage: Send + Sync {
    /// Ordered nodes for `key`, primary first.
    fn resolve(&self, key: &RepositoryKey) -> Result<Placement, StorageError>;

    /// Initializes a bare repository on the primary and returns its path.
    async fn create_repository(&self, key: &RepositoryKey) -> Result<PathBuf, StorageError>;

    /// Locates a usable copy, failing over past nodes that lack one.
    async fn open_repository(&self, key: &RepositoryKey) -> Result<OpenedRepository, StorageError>;

    async fn delete_repository(&self, key: &RepositoryKey) -> Result<(), StorageError>;

    /// Schedules replication from the primary to `replicas`.
    fn replicate_to(&self, key: &RepositoryKey, replicas: &[NodeId]) -> Result<(), StorageError>;

    /// Called after a successful push to `written`.
    fn repository_written(&self, written: &OpenedRepository);
}

/// Outcome of looking for a repository on a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CopyState {
    Present(PathBuf),
    Missing,
    Unreachable,
}

async fn init_bare(shell: &GitShell, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    shell
        .admin([
            OsStr::new("init"),
            OsStr::new("--bare"),
            OsStr::new("--quiet"),
            path.as_os_str(),
        ])
        .await?;
    Ok(())
}

// ============================================================
// LOCAL
// ============================================================

/// Single-directory storage: `<base_path>/<owner>/<name>.git`.
pub struct LocalGitStorage {
    base_path: PathBuf,
    node_id: NodeId,
    shell: Arc<GitShell>,
}

impl LocalGitStorage {
    pub fn new(base_path: impl Into<PathBuf>, node_id: NodeId, shell: Arc<GitShell>) -> Self {
        Self {
            base_path: base_path.into(),
            node_id,
            shell,
        }
    }

    fn path_for(&self, key: &RepositoryKey) -> PathBuf {
        self.base_path.join(key.relative_path())
    }
}

#[async_trait]
impl GitStorage for LocalGitStorage {
    fn resolve(&self, _key: &RepositoryKey) -> Result<Placement, StorageError> {
        Ok(Placement {
            nodes: vec![self.node_id.clone()],
        })
    }

    async fn create_repository(&self, key: &RepositoryKey) -> Result<PathBuf, StorageError> {
        let path = self.path_for(key);
        if has_repository(&path).await {
            return Err(StorageError::AlreadyExists(key.clone()));
        }
        init_bare(&self.shell, &path).await?;
        tracing::info!(key = %key, path = %path.display(), "repository created");
        Ok(path)
    }

    async fn open_repository(&self, key: &RepositoryKey) -> Result<OpenedRepository, StorageError> {
        let path = self.path_for(key);
        if !has_repository(&path).await {
            return Err(StorageError::RepositoryNotFound(key.clone()));
        }
        Ok(OpenedRepository {
            key: key.clone(),
            node: self.node_id.clone(),
            root: self.base_path.clone(),
            path,
        })
    }

    async fn delete_repository(&self, key: &RepositoryKey) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if !has_repository(&path).await {
            return Err(StorageError::RepositoryNotFound(key.clone()));
        }
        tokio::fs::remove_dir_all(&path).await?;
        tracing::info!(key = %key, "repository deleted");
        Ok(())
    }

    fn replicate_to(&self, key: &RepositoryKey, _replicas: &[NodeId]) -> Result<(), StorageError> {
        tracing::debug!(key = %key, "replication requested in local mode, ignoring");
        Ok(())
    }

    fn repository_written(&self, _written: &OpenedRepository) {}
}

// ============================================================
// DISTRIBUTED
// ============================================================

/// Storage spread over the cluster's nodes, placed by the hash ring.
pub struct DistributedGitStorage {
    cluster: Arc<Cluster>,
    shell: Arc<GitShell>,
    replicator: Replicator,
}

impl DistributedGitStorage {
    pub fn new(cluster: Arc<Cluster>, shell: Arc<GitShell>, replicator: Replicator) -> Self {
        Self {
            cluster,
            shell,
            replicator,
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    fn node_root(&self, id: &NodeId) -> Result<PathBuf, StorageError> {
        self.cluster
            .registry()
            .get(id)
            .map(|node| node.root)
            .ok_or_else(|| StorageError::UnknownNode(id.clone()))
    }

    async fn copy_state(&self, id: &NodeId, key: &RepositoryKey) -> Result<CopyState, StorageError> {
        let root = self.node_root(id)?;
        if tokio::fs::metadata(&root).await.is_err() {
            return Ok(CopyState::Unreachable);
        }
        let path = root.join(key.relative_path());
        if has_repository(&path).await {
            Ok(CopyState::Present(path))
        } else {
            Ok(CopyState::Missing)
        }
    }
}

#[async_trait]
impl GitStorage for DistributedGitStorage {
    fn resolve(&self, key: &RepositoryKey) -> Result<Placement, StorageError> {
        let nodes = self.cluster.placement_for(&key.to_string());
        if nodes.is_empty() {
            return Err(StorageError::NoHealthyNode(key.clone()));
        }
        Ok(Placement { nodes })
    }

    async fn create_repository(&self, key: &RepositoryKey) -> Result<PathBuf, StorageError> {
        let placement = self.resolve(key)?;
        let Some(primary) = placement.primary() else {
            return Err(StorageError::NoHealthyNode(key.clone()));
        };

        let path = match self.copy_state(primary, key).await? {
            CopyState::Unreachable => return Err(StorageError::NodeUnreachable(primary.clone())),
            CopyState::Present(_) => return Err(StorageError::AlreadyExists(key.clone())),
            CopyState::Missing => self.node_root(primary)?.join(key.relative_path()),
        };

        init_bare(&self.shell, &path).await?;
        tracing::info!(key = %key, node = %primary, path = %path.display(), "repository created");

        self.replicate_to(key, placement.replicas())?;
        Ok(path)
    }

    async fn open_repository(&self, key: &RepositoryKey) -> Result<OpenedRepository, StorageError> {
        let placement = self.resolve(key)?;
        let mut missing = Vec::new();
        let mut unreachable = None;

        for (index, node) in placement.nodes.iter().enumerate() {
            match self.copy_state(node, key).await? {
                CopyState::Present(path) => {
                    if index > 0 {
                        tracing::warn!(key = %key, served_by = %node, "primary missed, served from replica");
                        self.replicator.schedule(ReplicationJob {
                            key: key.clone(),
                            source: node.clone(),
                            targets: missing,
                        });
                    }
                    return Ok(OpenedRepository {
                        key: key.clone(),
                        node: node.clone(),
                        root: self.node_root(node)?,
                        path,
                    });
                }
                CopyState::Missing => {
                    tracing::debug!(key = %key, node = %node, "no copy on node");
                    missing.push(node.clone());
                }
                CopyState::Unreachable => {
                    tracing::warn!(key = %key, node = %node, "storage node root unreachable");
                    unreachable.get_or_insert_with(|| node.clone());
                }
            }
        }

        // An unreachable node may hold the only copy, so that outcome wins.
        match unreachable {
            Some(node) => Err(StorageError::NodeUnreachable(node)),
            None => Err(StorageError::RepositoryNotFound(key.clone())),
        }
    }

    async fn delete_repository(&self, key: &RepositoryKey) -> Result<(), StorageError> {
        let primary = self
            .resolve(key)
            .ok()
            .and_then(|placement| placement.primary().cloned());
        let mut deleted = 0usize;
        let mut primary_error = None;

        for node in self.cluster.registry().node_ids() {
            let CopyState::Present(path) = self.copy_state(&node, key).await? else {
                continue;
            };
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(key = %key, node = %node, "repository deleted from node");
                }
                Err(e) if primary.as_ref() == Some(&node) => {
                    tracing::error!(key = %key, node = %node, error = %e, "failed to delete primary copy");
                    primary_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(key = %key, node = %node, error = %e, "failed to delete replica copy");
                }
            }
        }

        if let Some(e) = primary_error {
            return Err(StorageError::Io(e));
        }
        if deleted == 0 {
            return Err(StorageError::RepositoryNotFound(key.clone()));
        }
        Ok(())
    }

    fn replicate_to(&self, key: &RepositoryKey, replicas: &[NodeId]) -> Result<(), StorageError> {
        let placement = self.resolve(key)?;
        let Some(primary) = placement.primary() else {
            return Err(StorageError::NoHealthyNode(key.clone()));
        };
        self.replicator.schedule(ReplicationJob {
            key: key.clone(),
            source: primary.clone(),
            targets: replicas.iter().filter(|id| *id != primary).cloned().collect(),
        });
        Ok(())
    }

    fn repository_written(&self, written: &OpenedRepository) {
        let Ok(placement) = self.resolve(&written.key) else {
            return;
        };
        let targets: Vec<NodeId> = placement
            .nodes
            .into_iter()
            .filter(|id| *id != written.node)
            .collect();
        self.replicator.schedule(ReplicationJob {
            key: written.key.clone(),
            source: written.node.clone(),
            targets,
        });
    }
}
