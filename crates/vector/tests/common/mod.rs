#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;

use vector::codec;
use vector::index::{FlatIndex, IndexParameter, VectorIndex};
use vector::kv::MemoryKv;
use vector::meta::MemoryMetaStore;
use vector::raft::StaticRaftEngine;
use vector::region::Region;
use vector::snapshot::{snapshot_dir_name, FileReaderRegistry};
use vector::wal::MemoryWalManager;
use vector::{SnapshotManager, VectorConfig, VectorIndexManager};

pub struct TestEnv {
    pub root: TempDir,
    pub kv: Arc<MemoryKv>,
    pub meta_store: Arc<MemoryMetaStore>,
    pub wal_manager: Arc<MemoryWalManager>,
    pub raft: Arc<StaticRaftEngine>,
    pub readers: Arc<FileReaderRegistry>,
    pub manager: Arc<VectorIndexManager>,
}

pub fn test_env() -> TestEnv {
    test_env_with(true, true)
}

pub fn test_env_with(enable_follower_hold_index: bool, leader: bool) -> TestEnv {
    let root = TempDir::new().unwrap();
    let config = VectorConfig {
        index_path: root.path().to_path_buf(),
        enable_follower_hold_index,
        // Small batches so tests exercise the flush boundaries.
        build_vector_index_batch_size: 4,
        ..VectorConfig::default()
    };

    let self_peer: SocketAddr = "127.0.0.1:20400".parse().unwrap();
    let raft = Arc::new(StaticRaftEngine::new(self_peer, vec![self_peer], leader));
    let readers = Arc::new(FileReaderRegistry::new());
    let wal_manager = Arc::new(MemoryWalManager::new());
    let kv = Arc::new(MemoryKv::new());
    let meta_store = Arc::new(MemoryMetaStore::new());

    let snapshots = Arc::new(SnapshotManager::new(
        &config,
        "127.0.0.1".into(),
        20400,
        readers.clone(),
        raft.clone(),
        wal_manager.clone(),
    ));
    let manager = Arc::new(VectorIndexManager::new(
        config,
        snapshots,
        meta_store.clone(),
        kv.clone(),
        wal_manager.clone(),
        raft.clone(),
    ));

    TestEnv {
        root,
        kv,
        meta_store,
        wal_manager,
        raft,
        readers,
        manager,
    }
}

pub fn make_region(id: u64, dimension: usize) -> Arc<Region> {
    let start_key = id.to_be_bytes().to_vec();
    let mut end_key = start_key.clone();
    end_key.extend_from_slice(&[0xff; 9]);
    Arc::new(Region::new(
        id,
        start_key,
        end_key,
        IndexParameter::Flat { dimension },
    ))
}

pub fn seed_kv_row(env: &TestEnv, region: &Region, id: u64, values: &[f32]) {
    let key = codec::vector_data_key(region.start_key(), id);
    env.kv.put(key, codec::encode_vector_value(values).unwrap());
}

/// Write a complete snapshot directory the way the writer lays it out.
pub fn seed_disk_snapshot(
    env: &TestEnv,
    index_id: u64,
    dimension: usize,
    log_id: u64,
    rows: &[(u64, Vec<f32>)],
) {
    let dir = env
        .root
        .path()
        .join(index_id.to_string())
        .join(snapshot_dir_name(log_id));
    fs::create_dir_all(&dir).unwrap();

    let index = FlatIndex::new(index_id, dimension);
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
}
