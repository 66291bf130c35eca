//! Vector node - replicated vector index server
//!
//! Serves per-region vector indexes kept crash-consistent through raft WAL
//! replay and peer-installed snapshots.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use node::config::Config;
use node::server;
use vector::kv::MemoryKv;
use vector::meta::MemoryMetaStore;
use vector::raft::{RaftEngine, StaticRaftEngine};
use vector::region::Region;
use vector::snapshot::FileReaderRegistry;
use vector::wal::MemoryWalManager;
use vector::{SnapshotManager, VectorIndexManager};

/// Vector node configuration
#[derive(Parser, Debug)]
#[command(name = "vector-node")]
#[command(about = "Replicated vector index node")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node ID
    #[arg(short, long)]
    node_id: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from file if specified, otherwise use defaults
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Override config with command line arguments
    if let Some(node_id) = args.node_id {
        config.node.node_id = node_id;
    }
    if let Some(log_level) = args.log_level {
        config.log.level = log_level;
    }

    // Initialize logging
    let level = match config.log.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting vector node: {}", config.node.node_id);
    info!("Index directory: {:?}", config.vector.index_path);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let mut peers = Vec::new();
    for peer in &config.raft.peers {
        peers.push(peer.parse::<SocketAddr>()?);
    }
    if peers.is_empty() {
        peers.push(addr);
    }

    std::fs::create_dir_all(&config.vector.index_path)?;

    // Assemble the subsystem: in-memory collaborators back the standalone
    // node; a full deployment swaps them for the real engines.
    let readers = Arc::new(FileReaderRegistry::new());
    let raft: Arc<dyn RaftEngine> =
        Arc::new(StaticRaftEngine::new(addr, peers, config.raft.leader));
    let wal_manager = Arc::new(MemoryWalManager::new());
    let kv = Arc::new(MemoryKv::new());
    let meta_store = Arc::new(MemoryMetaStore::new());

    let snapshots = Arc::new(SnapshotManager::new(
        &config.vector,
        config.server.host.clone(),
        config.server.port,
        readers.clone(),
        raft.clone(),
        wal_manager.clone(),
    ));
    let manager = Arc::new(VectorIndexManager::new(
        config.vector.clone(),
        snapshots,
        meta_store,
        kv,
        wal_manager.clone(),
        raft,
    ));

    let regions: Vec<Arc<Region>> = config
        .regions
        .iter()
        .map(|region| Arc::new(region.to_region()))
        .collect();
    for region in &regions {
        wal_manager.get_or_create(region.id());
    }

    tokio::task::block_in_place(|| manager.init(regions))
        .map_err(|e| anyhow::anyhow!("init vector index manager failed: {}", e))?;

    vector::start_scrubber(manager.clone());

    info!("Vector node is ready, gRPC server listening on {}", addr);
    server::serve(addr, manager, readers).await
}
