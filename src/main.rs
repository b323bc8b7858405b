use anyhow::{Context, Result};
use forge_cluster::access::StaticAccessList;
use forge_cluster::cluster::probe::probe_for;
use forge_cluster::cluster::{Cluster, HealthMonitor};
use forge_cluster::config::Config;
use forge_cluster::git::GitShell;
use forge_cluster::ssh::server::{load_host_key, russh_config};
use forge_cluster::ssh::{GitTransport, SessionContext, SshServer};
use forge_cluster::storage::handlers::{AdminState, router};
use forge_cluster::storage::protocol::PlacementResponse;
use forge_cluster::storage::replication::{DEFAULT_QUEUE_CAPACITY, ReplicationWorker, Replicator};
use forge_cluster::storage::{DistributedGitStorage, GitStorage, LocalGitStorage, RepositoryKey};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "forge-cluster", about = "Git SSH transport and repository storage node")]
struct Cli {
    /// Configuration file layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the SSH server (default).
    Serve,
    /// Print the storage nodes a repository maps to.
    Placement { repository: String },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    match config.observability.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
    }
}

fn build_cluster(config: &Config) -> Arc<Cluster> {
    Cluster::new(
        config.node_id(),
        config.node_specs(),
        config.placement_strategy(),
        config.cluster.replication_count,
        config.cluster.base_virtual_nodes,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    use clap::Parser;
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, cli.config).await,
        Command::Placement { repository } => print_placement(&config, &repository),
    }
}

fn print_placement(config: &Config, repository: &str) -> Result<()> {
    let key = RepositoryKey::parse(repository)
        .with_context(|| format!("invalid repository: {}", repository))?;

    let nodes = if config.cluster.distributed {
        build_cluster(config)
            .placement_for(&key.to_string())
            .iter()
            .map(|id| id.to_string())
            .collect()
    } else {
        vec![config.cluster.node_id.clone()]
    };

    let response = PlacementResponse {
        repository: key.to_string(),
        nodes,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn serve(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!(
        node_id = %config.cluster.node_id,
        distributed = config.cluster.distributed,
        "node starting"
    );

    let shutdown = CancellationToken::new();
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    // 1. Access list and git:
    let access = Arc::new(StaticAccessList::load(&config.access.acl_path)?);
    let shell = Arc::new(GitShell::new(&config.storage.git_binary));

    // 2. Storage layer:
    let mut cluster = None;
    let storage: Arc<dyn GitStorage> = if config.cluster.distributed {
        let nodes = build_cluster(&config);
        for node in nodes.registry().nodes() {
            if !node.root.is_dir() {
                tracing::warn!(node = %node.id, root = %node.root.display(), "storage node root not mounted");
            }
        }

        let monitor = HealthMonitor::new(
            nodes.registry().clone(),
            probe_for(config.cluster.probe, config.health_config().probe_timeout),
            config.health_config(),
        );
        background.push(monitor.clone().spawn(shutdown.clone()));

        let (replicator, jobs) = Replicator::channel(DEFAULT_QUEUE_CAPACITY);
        let worker = ReplicationWorker::new(
            nodes.clone(),
            shell.clone(),
            Some(monitor),
            config.replication_config(),
        );
        background.push(worker.spawn(jobs, shutdown.clone()));

        cluster = Some(nodes.clone());
        Arc::new(DistributedGitStorage::new(nodes, shell.clone(), replicator))
    } else {
        tokio::fs::create_dir_all(&config.storage.base_path)
            .await
            .with_context(|| format!("failed to create {}", config.storage.base_path.display()))?;
        Arc::new(LocalGitStorage::new(
            &config.storage.base_path,
            config.node_id(),
            shell.clone(),
        ))
    };

    // 3. SSH server:
    let settings = config.ssh_settings()?;
    let host_key = load_host_key(&config.ssh.host_key_path)?;
    let context = Arc::new(SessionContext {
        key_store: access.clone(),
        transport: Arc::new(GitTransport::new(access.clone(), storage.clone(), shell)),
        tracker: TaskTracker::new(),
    });
    let server = SshServer::new(russh_config(&settings, host_key), context, settings);
    let listener = server.bind().await?;

    // 4. Admin API:
    if let Some(addr) = config.admin_addr()? {
        let app = router(Arc::new(AdminState {
            node_id: config.node_id(),
            storage,
            cluster: cluster.clone(),
        }));
        let admin_listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind admin API on {}", addr))?;
        tracing::info!("Admin API listening on {}", addr);

        let stop = shutdown.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                tracing::error!("Admin API failed: {}", e);
            }
        }));
    }

    // 5. Signals:
    background.push(spawn_signal_handler(
        shutdown.clone(),
        config_path,
        cluster,
        access,
    )?);

    server.run(listener, shutdown.clone()).await?;
    shutdown.cancel();
    for task in background {
        let _ = task.await;
    }
    tracing::info!("node stopped");
    Ok(())
}

/// SIGINT/SIGTERM start a graceful shutdown; SIGHUP reloads the storage
/// node list and the access list.
fn spawn_signal_handler(
    shutdown: CancellationToken,
    config_path: Option<PathBuf>,
    cluster: Option<Arc<Cluster>>,
    access: Arc<StaticAccessList>,
) -> Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("SIGINT received, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received, reloading");
                    reload(config_path.as_deref(), cluster.as_deref(), &access);
                }
            }
        }
    }))
}

fn reload(config_path: Option<&std::path::Path>, cluster: Option<&Cluster>, access: &StaticAccessList) {
    if let Err(e) = access.reload() {
        tracing::error!(error = %e, "access list reload failed, keeping previous list");
    }

    let Some(cluster) = cluster else {
        return;
    };
    match Config::load(config_path) {
        Ok(config) => cluster.reload(config.node_specs()),
        Err(e) => tracing::error!(error = %e, "configuration reload failed, keeping node set"),
    }
}
