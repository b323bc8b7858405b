use crate::cluster::types::NodeId;
use crate::git::types::GitError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Normalized `owner/name` identifier of a hosted repository.
///
/// Only used as ring input and for path construction; never stored in the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryKey {
    owner: String,
    name: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("repository path is empty")]
    Empty,
    #[error("repository path must have the form owner/name: {0}")]
    Shape(String),
    #[error("invalid repository path segment: {0}")]
    Segment(String),
}

impl RepositoryKey {
    /// Parses a client path. A leading `/`, trailing `/` and a trailing `.git`
    /// are optional and normalize away.
    pub fn parse(path: &str) -> Result<Self, KeyError> {
        let trimmed = path.trim().trim_start_matches('/').trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }

        let mut segments = trimmed.split('/');
        let (Some(owner), Some(name), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(KeyError::Shape(path.to_string()));
        };

        for segment in [owner, name] {
            if !valid_segment(segment) {
                return Err(KeyError::Segment(segment.to_string()));
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk location relative to a storage root: `owner/name.git`.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.owner).join(format!("{}.git", self.name))
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Ordered storage targets for one repository; the first is the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub nodes: Vec<NodeId>,
}

impl Placement {
    pub fn primary(&self) -> Option<&NodeId> {
        self.nodes.first()
    }

    pub fn replicas(&self) -> &[NodeId] {
        self.nodes.get(1..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Where a repository was found for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedRepository {
    pub key: RepositoryKey,
    /// Node serving the request (the local node in single-store mode).
    pub node: NodeId,
    /// Storage root of `node`; the repository lives strictly inside it.
    pub root: PathBuf,
    /// Absolute path of the bare repository.
    pub path: PathBuf,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no healthy storage node available for {0}")]
    NoHealthyNode(RepositoryKey),

    #[error("repository {0} not found")]
    RepositoryNotFound(RepositoryKey),

    #[error("repository {0} already exists")]
    AlreadyExists(RepositoryKey),

    #[error("storage node {0} is unreachable")]
    NodeUnreachable(NodeId),

    #[error("unknown storage node {0}")]
    UnknownNode(NodeId),

    #[error("git command failed: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Conditions a client may retry later rather than treat as final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::NoHealthyNode(_) | StorageError::NodeUnreachable(_)
        )
    }
}
