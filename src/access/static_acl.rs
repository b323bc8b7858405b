//! File-backed access list.
//!
//! ```toml
//! [[users]]
//! name = "alice"
//! keys = ["SHA256:...", "ssh-ed25519 AAAA... alice@laptop"]
//!
//! [[repositories]]
//! key = "alice/widgets"
//! public = false
//! collaborators = { bob = "read", carol = "write" }
//! ```
//!
//! The owner segment of a repository key always has write access. Public
//! repositories are readable by every authenticated user.

use super::adapter::{KeyStore, RepositoryAccess};
use super::types::{AccessError, AccessLevel, UserIdentity, normalize_key_entry};
use crate::storage::types::RepositoryKey;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct AclFile {
    #[serde(default)]
    users: Vec<UserEntry>,
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    name: String,
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
    key: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    collaborators: HashMap<String, AccessLevel>,
}

#[derive(Debug, Clone, Default)]
struct RepositoryRule {
    public: bool,
    collaborators: HashMap<String, AccessLevel>,
}

#[derive(Debug, Default)]
struct AclSnapshot {
    /// fingerprint -> username
    keys: HashMap<String, String>,
    repositories: HashMap<RepositoryKey, RepositoryRule>,
}

impl AclSnapshot {
    fn from_file(file: AclFile) -> Result<Self, AccessError> {
        let mut snapshot = AclSnapshot::default();

        for user in file.users {
            for entry in &user.keys {
                let Some(fingerprint) = normalize_key_entry(entry) else {
                    return Err(AccessError::Backend(format!(
                        "user {}: unparseable key entry {:?}",
                        user.name, entry
                    )));
                };
                if let Some(previous) = snapshot.keys.insert(fingerprint.clone(), user.name.clone())
                    && previous != user.name
                {
                    return Err(AccessError::Backend(format!(
                        "key {} is claimed by both {} and {}",
                        fingerprint, previous, user.name
                    )));
                }
            }
        }

        for repo in file.repositories {
            let key = RepositoryKey::parse(&repo.key)?;
            snapshot.repositories.insert(
                key,
                RepositoryRule {
                    public: repo.public,
                    collaborators: repo.collaborators,
                },
            );
        }

        Ok(snapshot)
    }

    fn level_for(&self, username: &str, key: &RepositoryKey) -> Option<AccessLevel> {
        let rule = self.repositories.get(key)?;
        if key.owner() == username {
            return Some(AccessLevel::Write);
        }
        match rule.collaborators.get(username) {
            Some(level) => Some(*level),
            None if rule.public => Some(AccessLevel::Read),
            None => None,
        }
    }
}

/// Access list loaded from a TOML file, swappable at runtime.
pub struct StaticAccessList {
    source: Option<PathBuf>,
    current: ArcSwap<AclSnapshot>,
}

impl StaticAccessList {
    pub fn from_toml(contents: &str) -> Result<Self, AccessError> {
        let snapshot = parse(contents)?;
        Ok(Self {
            source: None,
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    pub fn load(path: &Path) -> Result<Self, AccessError> {
        let snapshot = read_snapshot(path)?;
        tracing::info!(
            path = %path.display(),
            keys = snapshot.keys.len(),
            repositories = snapshot.repositories.len(),
            "access list loaded"
        );
        Ok(Self {
            source: Some(path.to_path_buf()),
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// Re-reads the backing file. On failure the previous list stays active.
    pub fn reload(&self) -> Result<(), AccessError> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let snapshot = read_snapshot(path)?;
        tracing::info!(
            keys = snapshot.keys.len(),
            repositories = snapshot.repositories.len(),
            "access list reloaded"
        );
        self.current.store(Arc::new(snapshot));
        Ok(())
    }

    pub fn repository_keys(&self) -> Vec<RepositoryKey> {
        let mut keys: Vec<_> = self.current.load().repositories.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn parse(contents: &str) -> Result<AclSnapshot, AccessError> {
    let file: AclFile = toml::from_str(contents)
        .map_err(|e| AccessError::Backend(format!("invalid access list: {}", e)))?;
    AclSnapshot::from_file(file)
}

fn read_snapshot(path: &Path) -> Result<AclSnapshot, AccessError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AccessError::Backend(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse(&contents)
}

#[async_trait]
impl KeyStore for StaticAccessList {
    async fn user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserIdentity>, AccessError> {
        Ok(self
            .current
            .load()
            .keys
            .get(fingerprint)
            .map(|username| UserIdentity {
                username: username.clone(),
                fingerprint: fingerprint.to_string(),
            }))
    }
}

#[async_trait]
impl RepositoryAccess for StaticAccessList {
    async fn resolve_repository_key(&self, path: &str) -> Result<RepositoryKey, AccessError> {
        let key = RepositoryKey::parse(path)?;
        if !self.current.load().repositories.contains_key(&key) {
            return Err(AccessError::NotFound(key.to_string()));
        }
        Ok(key)
    }

    async fn authorize(
        &self,
        user: &UserIdentity,
        key: &RepositoryKey,
        level: AccessLevel,
    ) -> Result<bool, AccessError> {
        let granted = self.current.load().level_for(&user.username, key);
        Ok(granted.is_some_and(|granted| granted.satisfies(level)))
    }
}
