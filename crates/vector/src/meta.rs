//! Per-index metadata persistence
//!
//! Apply and snapshot log ids survive restarts through this store so a
//! rebuild can resume from the right WAL position.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Small keyed blob store for index metadata.
pub trait MetaStore: Send + Sync {
    fn put(&self, key: Vec<u8>, value: Vec<u8>);
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn delete(&self, key: &[u8]);
}

const APPLY_LOG_ID_PREFIX: &str = "vector_index_apply_log_id";
const SNAPSHOT_LOG_ID_PREFIX: &str = "vector_index_snapshot_log_id";

pub fn apply_log_id_key(index_id: u64) -> Vec<u8> {
    format!("{}_{}", APPLY_LOG_ID_PREFIX, index_id).into_bytes()
}

pub fn snapshot_log_id_key(index_id: u64) -> Vec<u8> {
    format!("{}_{}", SNAPSHOT_LOG_ID_PREFIX, index_id).into_bytes()
}

#[derive(Default)]
pub struct MemoryMetaStore {
    data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.lock().insert(key, value);
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().get(key).cloned()
    }

    fn delete(&self, key: &[u8]) {
        self.data.lock().remove(key);
    }
}
