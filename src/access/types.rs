use crate::storage::types::KeyError;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Authenticated principal bound to an SSH session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserIdentity {
    pub username: String,
    /// `SHA256:<base64>` fingerprint of the key that authenticated.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

impl AccessLevel {
    /// Write access implies read access.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Read => f.write_str("read"),
            AccessLevel::Write => f.write_str("write"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("malformed repository path: {0}")]
    Malformed(#[from] KeyError),

    #[error("unknown repository: {0}")]
    NotFound(String),

    #[error("access backend error: {0}")]
    Backend(String),
}

/// Fingerprint in the format printed by `ssh-keygen -l`: `SHA256:` followed
/// by the unpadded base64 SHA-256 of the public key blob.
pub fn fingerprint_of_blob(blob: &[u8]) -> String {
    let hash = Sha256::digest(blob);
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{encoded}")
}

/// Accepts either a ready fingerprint or an OpenSSH public key line
/// (`ssh-ed25519 AAAA... comment`) and returns the fingerprint.
pub fn normalize_key_entry(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.starts_with("SHA256:") {
        return Some(entry.to_string());
    }

    let blob_b64 = entry.split_whitespace().nth(1)?;
    let blob = base64::engine::general_purpose::STANDARD
        .decode(blob_b64.as_bytes())
        .ok()?;
    Some(fingerprint_of_blob(&blob))
}
