#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use node::server::build_router;
use vector::index::{FlatIndex, VectorIndex};
use vector::kv::MemoryKv;
use vector::meta::MemoryMetaStore;
use vector::raft::{RaftEngine, StaticRaftEngine};
use vector::snapshot::{snapshot_dir_name, FileReaderRegistry};
use vector::wal::MemoryWalManager;
use vector::{SnapshotManager, VectorConfig, VectorIndexManager};

/// One in-process node: manager plus a gRPC server on an ephemeral port.
pub struct TestNode {
    pub addr: SocketAddr,
    pub manager: Arc<VectorIndexManager>,
    pub readers: Arc<FileReaderRegistry>,
    pub wal_manager: Arc<MemoryWalManager>,
    pub root: TempDir,
}

/// Bind a listener first so peers can learn each other's address before the
/// nodes are assembled.
pub async fn bind_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub async fn start_node(
    listener: TcpListener,
    peers: Vec<SocketAddr>,
    leader: bool,
) -> TestNode {
    let addr = listener.local_addr().unwrap();
    let root = TempDir::new().unwrap();
    let config = VectorConfig {
        index_path: root.path().to_path_buf(),
        // Tiny chunks so multi-chunk streaming is exercised.
        file_transport_chunk_size: 16,
        ..VectorConfig::default()
    };

    let readers = Arc::new(FileReaderRegistry::new());
    let raft: Arc<dyn RaftEngine> = Arc::new(StaticRaftEngine::new(addr, peers, leader));
    let wal_manager = Arc::new(MemoryWalManager::new());
    let kv = Arc::new(MemoryKv::new());
    let meta_store = Arc::new(MemoryMetaStore::new());

    let snapshots = Arc::new(SnapshotManager::new(
        &config,
        addr.ip().to_string(),
        addr.port(),
        readers.clone(),
        raft.clone(),
        wal_manager.clone(),
    ));
    let manager = Arc::new(VectorIndexManager::new(
        config,
        snapshots,
        meta_store,
        kv,
        wal_manager.clone(),
        raft,
    ));

    let router = build_router(manager.clone(), readers.clone());
    tokio::spawn(async move {
        let _ = router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });

    TestNode {
        addr,
        manager,
        readers,
        wal_manager,
        root,
    }
}

/// Write a snapshot directory on disk and admit it into the node's registry.
pub fn seed_snapshot(node: &TestNode, index_id: u64, log_id: u64, rows: &[(u64, Vec<f32>)]) {
    let dir = node
        .root
        .path()
        .join(index_id.to_string())
        .join(snapshot_dir_name(log_id));
    fs::create_dir_all(&dir).unwrap();

    let index = FlatIndex::new(index_id, 2);
    index
        .upsert(
            rows.iter()
                .map(|(id, values)| proto::common::VectorWithId {
                    id: *id,
                    values: values.clone(),
                })
                .collect(),
        )
        .unwrap();
    index
        .save(&dir.join(format!("index_{}_{}.idx", index_id, log_id)))
        .unwrap();
    fs::write(dir.join("meta"), format!("{}\n", log_id)).unwrap();

    node.manager
        .snapshot_manager()
        .init(&[index_id])
        .unwrap();
}
