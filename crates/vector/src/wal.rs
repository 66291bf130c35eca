//! Write-ahead log access for vector index replay
//!
//! The raft log itself is owned by the consensus layer; replay only needs
//! the decoded vector commands plus the truncation hint written back after
//! a successful snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use proto::common::VectorWithId;

/// Vector mutation carried by one raft log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VectorCommand {
    VectorAdd { vectors: Vec<VectorWithId> },
    VectorDelete { ids: Vec<u64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub commands: Vec<VectorCommand>,
}

/// Log storage of one raft group.
pub trait WalStorage: Send + Sync {
    /// Entries with log index in `[from, to]`, ascending.
    fn entries(&self, from: u64, to: u64) -> Vec<LogEntry>;

    /// Tell the log it may truncate vector entries up to and including
    /// `log_index` (the newest snapshot covers them).
    fn set_vector_index_truncate_log_index(&self, log_index: u64);

    fn vector_index_truncate_log_index(&self) -> u64;
}

/// Lookup of the per-group log storage.
pub trait WalManager: Send + Sync {
    fn wal(&self, index_id: u64) -> Option<Arc<dyn WalStorage>>;
}

#[derive(Default)]
pub struct MemoryWal {
    entries: Mutex<BTreeMap<u64, LogEntry>>,
    truncate_log_index: AtomicU64,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        self.entries.lock().insert(entry.index, entry);
    }

    pub fn last_index(&self) -> u64 {
        self.entries
            .lock()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }
}

impl WalStorage for MemoryWal {
    fn entries(&self, from: u64, to: u64) -> Vec<LogEntry> {
        self.entries
            .lock()
            .range(from..=to)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn set_vector_index_truncate_log_index(&self, log_index: u64) {
        self.truncate_log_index.store(log_index, Ordering::Release);
    }

    fn vector_index_truncate_log_index(&self) -> u64 {
        self.truncate_log_index.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct MemoryWalManager {
    wals: Mutex<HashMap<u64, Arc<MemoryWal>>>,
}

impl MemoryWalManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, index_id: u64) -> Arc<MemoryWal> {
        self.wals
            .lock()
            .entry(index_id)
            .or_insert_with(|| Arc::new(MemoryWal::new()))
            .clone()
    }
}

impl WalManager for MemoryWalManager {
    fn wal(&self, index_id: u64) -> Option<Arc<dyn WalStorage>> {
        self.wals
            .lock()
            .get(&index_id)
            .map(|wal| wal.clone() as Arc<dyn WalStorage>)
    }
}
