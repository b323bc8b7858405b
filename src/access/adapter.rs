//! Capability interfaces consumed by the SSH transport.
//!
//! The transport only sees these traits; whatever backs them (a relational
//! ownership model, a static file) stays out of its dependency graph.

use super::types::{AccessError, AccessLevel, UserIdentity};
use crate::storage::types::RepositoryKey;

use async_trait::async_trait;

/// Maps an offered public key to a platform user.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// `Ok(None)` when no user owns a key with this fingerprint.
    async fn user_by_fingerprint(&self, fingerprint: &str)
    -> Result<Option<UserIdentity>, AccessError>;
}

/// Repository lookup and per-repository authorization.
#[async_trait]
pub trait RepositoryAccess: Send + Sync {
    /// Turns a client path into a known repository key. Unknown and malformed
    /// paths are errors.
    async fn resolve_repository_key(&self, path: &str) -> Result<RepositoryKey, AccessError>;

    async fn authorize(
        &self,
        user: &UserIdentity,
        key: &RepositoryKey,
        level: AccessLevel,
    ) -> Result<bool, AccessError>;
}
