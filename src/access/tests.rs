//! Access Adapter Tests
//!
//! ## Test Scopes
//! - **Fingerprints**: Format and key-line normalization.
//! - **Key lookup**: Known and unknown fingerprints.
//! - **Authorization**: Owner, collaborators, public repositories, unknown repositories.
//! - **Reload**: A broken file never replaces a working list.

#[cfg(test)]
mod tests {
    use crate::access::adapter::{KeyStore, RepositoryAccess};
    use crate::access::static_acl::StaticAccessList;
    use crate::access::types::{
        AccessError, AccessLevel, UserIdentity, fingerprint_of_blob, normalize_key_entry,
    };
    use crate::storage::types::RepositoryKey;
    use base64::Engine as _;

    const ACL: &str = r#"
        [[users]]
        name = "alice"
        keys = ["SHA256:alicekey"]

        [[users]]
        name = "bob"
        keys = ["SHA256:bobkey"]

        [[users]]
        name = "mallory"
        keys = ["SHA256:mallorykey"]

        [[repositories]]
        key = "alice/widgets"
        collaborators = { bob = "read" }

        [[repositories]]
        key = "alice/docs"
        public = true
        collaborators = { bob = "write" }
    "#;

    fn user(name: &str) -> UserIdentity {
        UserIdentity {
            username: name.to_string(),
            fingerprint: format!("SHA256:{}key", name),
        }
    }

    fn key(path: &str) -> RepositoryKey {
        RepositoryKey::parse(path).unwrap()
    }

    // ============================================================
    // FINGERPRINTS
    // ============================================================

    #[test]
    fn test_fingerprint_format() {
        assert_eq!(
            fingerprint_of_blob(b""),
            "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn test_public_key_line_normalizes_to_fingerprint() {
        let blob = b"ssh-ed25519 pretend key blob";
        let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
        let line = format!("ssh-ed25519 {} alice@laptop", encoded);

        assert_eq!(normalize_key_entry(&line), Some(fingerprint_of_blob(blob)));
        assert_eq!(
            normalize_key_entry(" SHA256:abc "),
            Some("SHA256:abc".to_string())
        );
        assert_eq!(normalize_key_entry("garbage"), None);
    }

    // ============================================================
    // KEY LOOKUP
    // ============================================================

    #[tokio::test]
    async fn test_known_fingerprint_maps_to_user() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let found = acl.user_by_fingerprint("SHA256:bobkey").await.unwrap();
        assert_eq!(found, Some(user("bob")));
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_is_none() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        assert!(acl.user_by_fingerprint("SHA256:nobody").await.unwrap().is_none());
    }

    #[test]
    fn test_key_claimed_by_two_users_rejected() {
        let acl = r#"
            [[users]]
            name = "a"
            keys = ["SHA256:shared"]
            [[users]]
            name = "b"
            keys = ["SHA256:shared"]
        "#;
        assert!(matches!(
            StaticAccessList::from_toml(acl),
            Err(AccessError::Backend(_))
        ));
    }

    // ============================================================
    // AUTHORIZATION
    // ============================================================

    #[tokio::test]
    async fn test_resolve_normalizes_and_rejects_unknown() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();

        let resolved = acl.resolve_repository_key("/alice/widgets.git").await.unwrap();
        assert_eq!(resolved, key("alice/widgets"));

        assert!(matches!(
            acl.resolve_repository_key("alice/missing").await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            acl.resolve_repository_key("../etc/passwd").await,
            Err(AccessError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_has_write() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let repo = key("alice/widgets");
        assert!(acl.authorize(&user("alice"), &repo, AccessLevel::Write).await.unwrap());
        assert!(acl.authorize(&user("alice"), &repo, AccessLevel::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_collaborator_cannot_write() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let repo = key("alice/widgets");
        assert!(acl.authorize(&user("bob"), &repo, AccessLevel::Read).await.unwrap());
        assert!(!acl.authorize(&user("bob"), &repo, AccessLevel::Write).await.unwrap());
    }

    #[tokio::test]
    async fn test_private_repository_hidden_from_strangers() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let repo = key("alice/widgets");
        assert!(!acl.authorize(&user("mallory"), &repo, AccessLevel::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_public_repository_readable_not_writable() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let repo = key("alice/docs");
        assert!(acl.authorize(&user("mallory"), &repo, AccessLevel::Read).await.unwrap());
        assert!(!acl.authorize(&user("mallory"), &repo, AccessLevel::Write).await.unwrap());
        assert!(acl.authorize(&user("bob"), &repo, AccessLevel::Write).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlisted_repository_denied_even_to_owner_segment() {
        let acl = StaticAccessList::from_toml(ACL).unwrap();
        let repo = key("alice/unlisted");
        assert!(!acl.authorize(&user("alice"), &repo, AccessLevel::Read).await.unwrap());
    }

    // ============================================================
    // RELOAD
    // ============================================================

    #[tokio::test]
    async fn test_reload_picks_up_changes_and_keeps_old_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acl.toml");
        std::fs::write(&path, ACL).unwrap();
        let acl = StaticAccessList::load(&path).unwrap();
        assert_eq!(acl.repository_keys().len(), 2);

        std::fs::write(
            &path,
            format!("{}\n[[repositories]]\nkey = \"bob/tools\"\n", ACL),
        )
        .unwrap();
        acl.reload().unwrap();
        assert_eq!(acl.repository_keys().len(), 3);

        std::fs::write(&path, "this is [ not toml").unwrap();
        assert!(acl.reload().is_err());
        assert_eq!(acl.repository_keys().len(), 3);
        assert!(acl.resolve_repository_key("bob/tools").await.is_ok());
    }
}
