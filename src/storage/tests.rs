//! Storage Module Tests
//!
//! Validates repository placement, failover and replication scheduling on
//! temporary directories standing in for storage node mounts.
//!
//! ## Test Scopes
//! - **Keys**: Normalization and rejection of malformed repository paths.
//! - **Local mode**: Create/open/delete under a single base path.
//! - **Distributed mode**: Primary writes, failover, read-repair, unreachable vs missing copies.
//! - **Replication**: Worker behaviour with a scripted git, and a real mirror when git is installed.
//! - **Admin API**: Health, node and placement handlers.

#[cfg(test)]
mod tests {
    use crate::cluster::health::{HealthConfig, HealthMonitor};
    use crate::cluster::placement::{Cluster, PlacementStrategy};
    use crate::cluster::probe::{ProbeKind, probe_for};
    use crate::cluster::types::{NodeId, NodeSpec};
    use crate::git::GitShell;
    use crate::storage::handlers::{AdminState, handle_health, handle_nodes, handle_placement};
    use crate::storage::replication::{
        ReplicationConfig, ReplicationJob, ReplicationWorker, Replicator,
    };
    use crate::storage::service::{DistributedGitStorage, GitStorage, LocalGitStorage};
    use crate::storage::types::{KeyError, OpenedRepository, RepositoryKey, StorageError};
    use crate::testing::{fake_git, git_available};
    use axum::extract::{Extension, Path as AxumPath};
    use axum::http::StatusCode;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Fake git that understands `init --bare --quiet <path>` and reports no refs.
    fn scripted_git(dir: &Path) -> PathBuf {
        let log = dir.join("git.log");
        fake_git(
            dir,
            &format!(
                "echo \"$*\" >> {}\ncase \"$1\" in\n  init) mkdir -p \"$4\" && echo 'ref: refs/heads/main' > \"$4/HEAD\" ;;\nesac",
                log.display()
            ),
        )
    }

    struct Fixture {
        _dir: TempDir,
        roots: Vec<PathBuf>,
        cluster: Arc<Cluster>,
        storage: DistributedGitStorage,
        jobs: mpsc::Receiver<ReplicationJob>,
        shell: Arc<GitShell>,
    }

    /// Three nodes under static placement: n1 is primary, n2 the replica.
    fn fixture(git: Option<PathBuf>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let git = git.unwrap_or_else(|| scripted_git(dir.path()));
        let mut specs = Vec::new();
        let mut roots = Vec::new();
        for id in ["n1", "n2", "n3"] {
            let root = dir.path().join(id);
            std::fs::create_dir_all(&root).unwrap();
            roots.push(root.clone());
            specs.push(NodeSpec {
                id: NodeId::new(id),
                address: format!("127.0.0.1:1{}", &id[1..]),
                weight: 1,
                root,
            });
        }

        let cluster = Cluster::new(NodeId::new("n1"), specs, PlacementStrategy::Static, 2, 160);
        let shell = Arc::new(GitShell::new(git));
        let (replicator, jobs) = Replicator::channel(16);
        let storage = DistributedGitStorage::new(cluster.clone(), shell.clone(), replicator);

        Fixture {
            _dir: dir,
            roots,
            cluster,
            storage,
            jobs,
            shell,
        }
    }

    fn key(path: &str) -> RepositoryKey {
        RepositoryKey::parse(path).unwrap()
    }

    fn plant_copy(root: &Path, key: &RepositoryKey) -> PathBuf {
        let path = root.join(key.relative_path());
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        path
    }

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|name| NodeId::new(*name)).collect()
    }

    // ============================================================
    // REPOSITORY KEYS
    // ============================================================

    #[test]
    fn test_key_normalization() {
        for path in ["acme/widgets", "/acme/widgets", "acme/widgets.git", "/acme/widgets.git/"] {
            let parsed = RepositoryKey::parse(path).unwrap();
            assert_eq!(parsed.to_string(), "acme/widgets", "{}", path);
        }
        assert_eq!(
            key("acme/widgets").relative_path(),
            PathBuf::from("acme/widgets.git")
        );
    }

    #[test]
    fn test_key_rejects_malformed_paths() {
        assert_eq!(RepositoryKey::parse(""), Err(KeyError::Empty));
        assert_eq!(RepositoryKey::parse("/.git"), Err(KeyError::Empty));
        assert!(matches!(RepositoryKey::parse("widgets"), Err(KeyError::Shape(_))));
        assert!(matches!(RepositoryKey::parse("a/b/c"), Err(KeyError::Shape(_))));
        assert!(matches!(RepositoryKey::parse("../etc"), Err(KeyError::Segment(_))));
        assert!(matches!(RepositoryKey::parse("acme/.hidden"), Err(KeyError::Segment(_))));
        assert!(matches!(RepositoryKey::parse("acme/wid gets"), Err(KeyError::Segment(_))));
    }

    // ============================================================
    // LOCAL MODE
    // ============================================================

    #[tokio::test]
    async fn test_local_create_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let git = scripted_git(dir.path());
        let base = dir.path().join("repos");
        let storage = LocalGitStorage::new(&base, NodeId::new("local"), Arc::new(GitShell::new(git)));
        let repo = key("acme/widgets");

        assert_eq!(storage.resolve(&repo).unwrap().nodes, ids(&["local"]));
        assert!(matches!(
            storage.open_repository(&repo).await,
            Err(StorageError::RepositoryNotFound(_))
        ));

        let path = storage.create_repository(&repo).await.unwrap();
        assert_eq!(path, base.join("acme/widgets.git"));
        assert!(path.join("HEAD").is_file());
        assert!(matches!(
            storage.create_repository(&repo).await,
            Err(StorageError::AlreadyExists(_))
        ));

        let opened = storage.open_repository(&repo).await.unwrap();
        assert_eq!(opened.path, path);
        assert_eq!(opened.root, base);

        storage.delete_repository(&repo).await.unwrap();
        assert!(!path.exists());
        assert!(matches!(
            storage.delete_repository(&repo).await,
            Err(StorageError::RepositoryNotFound(_))
        ));
    }

    // ============================================================
    // DISTRIBUTED MODE
    // ============================================================

    #[tokio::test]
    async fn test_create_on_primary_schedules_replicas() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");

        let path = f.storage.create_repository(&repo).await.unwrap();
        assert_eq!(path, f.roots[0].join("acme/widgets.git"));
        assert!(path.join("HEAD").is_file());
        assert!(!f.roots[1].join("acme/widgets.git").exists());

        let job = f.jobs.try_recv().unwrap();
        assert_eq!(job.source, NodeId::new("n1"));
        assert_eq!(job.targets, ids(&["n2"]));
    }

    #[tokio::test]
    async fn test_open_prefers_primary() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");
        plant_copy(&f.roots[0], &repo);
        plant_copy(&f.roots[1], &repo);

        let opened = f.storage.open_repository(&repo).await.unwrap();
        assert_eq!(opened.node, NodeId::new("n1"));
        assert_eq!(opened.root, f.roots[0]);
        assert!(f.jobs.try_recv().is_err(), "no repair needed");
    }

    #[tokio::test]
    async fn test_open_fails_over_and_schedules_read_repair() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");
        let replica_path = plant_copy(&f.roots[1], &repo);

        let opened = f.storage.open_repository(&repo).await.unwrap();
        assert_eq!(opened.node, NodeId::new("n2"));
        assert_eq!(opened.path, replica_path);

        let job = f.jobs.try_recv().unwrap();
        assert_eq!(job.source, NodeId::new("n2"));
        assert_eq!(job.targets, ids(&["n1"]));
    }

    #[tokio::test]
    async fn test_unreachable_primary_fails_over() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");
        plant_copy(&f.roots[1], &repo);
        std::fs::remove_dir_all(&f.roots[0]).unwrap();

        let opened = f.storage.open_repository(&repo).await.unwrap();
        assert_eq!(opened.node, NodeId::new("n2"));

        // The unreachable primary is not a repair target.
        assert!(f.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_and_missing_are_distinct() {
        let f = fixture(None);
        let repo = key("acme/widgets");

        assert!(matches!(
            f.storage.open_repository(&repo).await,
            Err(StorageError::RepositoryNotFound(_))
        ));

        std::fs::remove_dir_all(&f.roots[0]).unwrap();
        match f.storage.open_repository(&repo).await {
            Err(StorageError::NodeUnreachable(node)) => assert_eq!(node, NodeId::new("n1")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_healthy_node_is_retryable_error() {
        let f = fixture(None);
        let monitor = HealthMonitor::new(
            f.cluster.registry().clone(),
            probe_for(ProbeKind::Tcp, Duration::from_millis(100)),
            HealthConfig {
                failure_threshold: 1,
                ..HealthConfig::default()
            },
        );
        for id in ids(&["n1", "n2", "n3"]) {
            monitor.report_failure(&id, "test");
        }

        let err = f.storage.resolve(&key("acme/widgets")).unwrap_err();
        assert!(matches!(err, StorageError::NoHealthyNode(_)));
        assert!(err.is_retryable());
        assert!(matches!(
            f.storage.open_repository(&key("acme/widgets")).await,
            Err(StorageError::NoHealthyNode(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_every_copy() {
        let f = fixture(None);
        let repo = key("acme/widgets");
        let copies: Vec<PathBuf> = f.roots.iter().map(|root| plant_copy(root, &repo)).collect();

        f.storage.delete_repository(&repo).await.unwrap();
        for copy in copies {
            assert!(!copy.exists(), "{} survived", copy.display());
        }
        assert!(matches!(
            f.storage.delete_repository(&repo).await,
            Err(StorageError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_schedules_replication_to_other_placement_nodes() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");
        let written = OpenedRepository {
            key: repo.clone(),
            node: NodeId::new("n2"),
            root: f.roots[1].clone(),
            path: f.roots[1].join(repo.relative_path()),
        };

        f.storage.repository_written(&written);
        let job = f.jobs.try_recv().unwrap();
        assert_eq!(job.source, NodeId::new("n2"));
        assert_eq!(job.targets, ids(&["n1"]));
    }

    #[tokio::test]
    async fn test_replicate_to_excludes_primary() {
        let mut f = fixture(None);
        let repo = key("acme/widgets");

        f.storage.replicate_to(&repo, &ids(&["n1", "n3"])).unwrap();
        let job = f.jobs.try_recv().unwrap();
        assert_eq!(job.source, NodeId::new("n1"));
        assert_eq!(job.targets, ids(&["n3"]));
    }

    // ============================================================
    // REPLICATION
    // ============================================================

    #[tokio::test]
    async fn test_full_queue_drops_jobs() {
        let (replicator, _jobs) = Replicator::channel(1);
        let job = ReplicationJob {
            key: key("acme/widgets"),
            source: NodeId::new("n1"),
            targets: ids(&["n2"]),
        };
        assert!(replicator.schedule(job.clone()));
        assert!(!replicator.schedule(job));
    }

    #[tokio::test]
    async fn test_worker_initializes_missing_target() {
        let f = fixture(None);
        let repo = key("acme/widgets");
        plant_copy(&f.roots[0], &repo);

        let worker = ReplicationWorker::new(
            f.cluster.clone(),
            f.shell.clone(),
            None,
            ReplicationConfig::default(),
        );
        let replicated = worker
            .replicate(&ReplicationJob {
                key: repo.clone(),
                source: NodeId::new("n1"),
                targets: ids(&["n2", "n3"]),
            })
            .await;

        assert_eq!(replicated, 2);
        assert!(f.roots[1].join("acme/widgets.git/HEAD").is_file());
        assert!(f.roots[2].join("acme/widgets.git/HEAD").is_file());
    }

    #[tokio::test]
    async fn test_exhausted_retries_reported_to_monitor() {
        let f = fixture(None);
        let repo = key("acme/widgets");
        plant_copy(&f.roots[0], &repo);
        std::fs::remove_dir_all(&f.roots[1]).unwrap();

        let monitor = HealthMonitor::new(
            f.cluster.registry().clone(),
            probe_for(ProbeKind::Tcp, Duration::from_millis(100)),
            HealthConfig {
                failure_threshold: 1,
                ..HealthConfig::default()
            },
        );
        let worker = ReplicationWorker::new(
            f.cluster.clone(),
            f.shell.clone(),
            Some(monitor),
            ReplicationConfig {
                attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
        );

        let replicated = worker
            .replicate(&ReplicationJob {
                key: repo,
                source: NodeId::new("n1"),
                targets: ids(&["n2"]),
            })
            .await;

        assert_eq!(replicated, 0);
        assert!(!f.cluster.registry().is_healthy(&NodeId::new("n2")));
        assert!(f.cluster.registry().is_healthy(&NodeId::new("n1")));
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let f = fixture(None);
        let (_replicator, jobs) = Replicator::channel(4);
        let worker = ReplicationWorker::new(
            f.cluster.clone(),
            f.shell.clone(),
            None,
            ReplicationConfig::default(),
        );
        let shutdown = tokio_util::sync::CancellationToken::new();
        let handle = worker.spawn(jobs, shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker must stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_mirror_with_real_git() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let f = fixture(Some(PathBuf::from("git")));
        let repo = key("acme/widgets");
        let primary = f.storage.create_repository(&repo).await.unwrap();

        let work = f._dir.path().join("work");
        let git = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(["-c", "user.name=t", "-c", "user.email=t@example.com"])
                .args(args)
                .status()
                .unwrap();
            assert!(status.success(), "git {:?} failed", args);
        };
        git(&["init", "--quiet", work.to_str().unwrap()]);
        git(&["-C", work.to_str().unwrap(), "commit", "--quiet", "--allow-empty", "-m", "first"]);
        git(&["-C", work.to_str().unwrap(), "push", "--quiet", primary.to_str().unwrap(), "HEAD:refs/heads/main"]);

        let worker = ReplicationWorker::new(
            f.cluster.clone(),
            f.shell.clone(),
            None,
            ReplicationConfig::default(),
        );
        let replicated = worker
            .replicate(&ReplicationJob {
                key: repo.clone(),
                source: NodeId::new("n1"),
                targets: ids(&["n2"]),
            })
            .await;
        assert_eq!(replicated, 1);

        let head = |dir: &Path| {
            let output = std::process::Command::new("git")
                .args(["--git-dir", dir.to_str().unwrap(), "rev-parse", "refs/heads/main"])
                .output()
                .unwrap();
            String::from_utf8(output.stdout).unwrap()
        };
        let replica = f.roots[1].join(repo.relative_path());
        assert!(!head(&primary).is_empty());
        assert_eq!(head(&primary), head(&replica));
    }

    // ============================================================
    // ADMIN API
    // ============================================================

    fn admin_state(f: &Fixture, storage: Arc<dyn GitStorage>) -> Arc<AdminState> {
        Arc::new(AdminState {
            node_id: NodeId::new("n1"),
            storage,
            cluster: Some(f.cluster.clone()),
        })
    }

    #[tokio::test]
    async fn test_admin_health_and_nodes() {
        let f = fixture(None);
        let (replicator, _jobs) = Replicator::channel(4);
        let storage = Arc::new(DistributedGitStorage::new(
            f.cluster.clone(),
            f.shell.clone(),
            replicator,
        ));
        let state = admin_state(&f, storage);

        let health = handle_health(Extension(state.clone())).await.0;
        assert_eq!(health.status, "ok");
        assert_eq!(health.mode, "distributed");

        let nodes = handle_nodes(Extension(state)).await.0.nodes;
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].id, "n1");
        assert!(nodes.iter().all(|node| node.healthy));
    }

    #[tokio::test]
    async fn test_admin_placement() {
        let f = fixture(None);
        let (replicator, _jobs) = Replicator::channel(4);
        let storage = Arc::new(DistributedGitStorage::new(
            f.cluster.clone(),
            f.shell.clone(),
            replicator,
        ));
        let state = admin_state(&f, storage);

        let placement = handle_placement(
            Extension(state.clone()),
            AxumPath(("acme".to_string(), "widgets.git".to_string())),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(placement.repository, "acme/widgets");
        assert_eq!(placement.nodes, vec!["n1".to_string(), "n2".to_string()]);

        let (status, _) = handle_placement(
            Extension(state),
            AxumPath(("..".to_string(), "etc".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
