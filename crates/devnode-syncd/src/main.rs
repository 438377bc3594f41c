//! DeviceNode Synchronization Daemon
//!
//! Main entry point for the devnodesyncd daemon.
//! Publishes the node's block devices to its DeviceNode record and keeps the
//! record converged until signalled to stop.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - File, flag and environment configuration

use anyhow::Context;
use clap::Parser;
use devnode_common::{DeviceProvider, MemoryStore, RecordStore, StaticProvider};
use devnode_syncd::{
    config_file::DEFAULT_CONFIG_PATH, DaemonConfig, NodeController, ProviderKind, StoreBackend,
    SysfsProvider,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DeviceNode inventory synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "devnodesyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Node identifier (record name)
    #[arg(short = 'n', long, env = "NODE_NAME")]
    node_id: Option<String>,

    /// UID of the owning node object
    #[arg(long, env = "NODE_UID")]
    owner_uid: Option<String>,

    /// Namespace holding DeviceNode records
    #[arg(long)]
    namespace: Option<String>,

    /// Number of worker loops
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Resync interval in seconds
    #[arg(long)]
    poll_interval_secs: Option<u64>,
}

impl Args {
    /// Applies command line overrides on top of the file configuration.
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(node_id) = &self.node_id {
            config.node.node_id = node_id.clone();
        }
        if let Some(uid) = &self.owner_uid {
            config.owner.uid = uid.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.node.namespace = namespace.clone();
        }
        if let Some(workers) = self.workers {
            config.controller.workers = workers;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.controller.poll_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // NIST: AU-3, AU-12 - Audit logging setup
    if let Err(e) = init_logging() {
        eprintln!("devnodesyncd: {e:#}");
        return ExitCode::FAILURE;
    }

    info!("devnodesyncd: Starting DeviceNode synchronization daemon");

    match run_daemon(args).await {
        Ok(()) => {
            info!("devnodesyncd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "devnodesyncd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

/// Initialize structured logging
///
/// Verbosity comes from `RUST_LOG`, defaulting to `info`.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {e}"))
}

/// Main daemon body
///
/// # NIST Controls
/// - CM-6: Configuration Settings - Validate before starting
/// - CP-10: System Recovery - Controller converges after restarts
async fn run_daemon(args: Args) -> anyhow::Result<()> {
    let mut config = DaemonConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);
    let controller_config = config
        .to_controller_config()
        .context("invalid configuration")?;

    info!(
        node = %controller_config.identity,
        workers = controller_config.workers,
        poll_interval = ?controller_config.poll_interval,
        "devnodesyncd: Configuration loaded"
    );

    let store = build_store(&config).await?;
    let provider = build_provider(&config);
    let controller = NodeController::new(controller_config, store, provider)?;

    let shutdown = setup_signal_handlers();
    controller.run(shutdown).await?;

    info!("devnodesyncd: Graceful shutdown complete");
    Ok(())
}

async fn build_store(config: &DaemonConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("devnodesyncd: Using in-memory record store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let redis_config = devnode_common::RedisStoreConfig::new(
                &config.store.redis_host,
                config.store.redis_port,
                config.store.redis_db,
            );
            info!(uri = %redis_config.uri(), "devnodesyncd: Connecting to Redis record store");
            let store = devnode_common::RedisStore::connect(redis_config)
                .await
                .context("connecting to Redis")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => anyhow::bail!("redis store backend requires the `redis` feature"),
    }
}

fn build_provider(config: &DaemonConfig) -> Arc<dyn DeviceProvider> {
    match config.provider.kind {
        ProviderKind::Sysfs => Arc::new(
            SysfsProvider::new(&config.provider.sysfs_root)
                .with_dev_dir(&config.provider.dev_dir)
                .with_exclude_prefixes(config.provider.exclude_prefixes.clone()),
        ),
        ProviderKind::Static => Arc::new(StaticProvider::new(Vec::new())),
    }
}

/// Setup signal handlers for graceful shutdown
///
/// # NIST Controls
/// - AU-12: Audit Record Generation - Log shutdown signals
fn setup_signal_handlers() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                info!(signal, "devnodesyncd: Received shutdown signal");
                token.cancel();
            }
            Err(e) => error!(error = %e, "devnodesyncd: Failed to listen for shutdown signals"),
        }
    });

    shutdown
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "SIGINT")
}
