//! Per-process registry of admitted snapshots

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::meta::SnapshotMeta;

/// Authoritative list of admitted snapshots, ordered by log id per index.
///
/// Entries are shared: removal here does not delete the directory while an
/// in-flight reader still holds the `Arc`.
#[derive(Default)]
pub struct SnapshotRegistry {
    snapshots: Mutex<HashMap<u64, BTreeMap<u64, Arc<SnapshotMeta>>>>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `(index_id, log_id)` is already present.
    pub fn add(&self, snapshot: Arc<SnapshotMeta>) -> bool {
        let mut guard = self.snapshots.lock();
        let inner = guard.entry(snapshot.index_id()).or_default();
        if inner.contains_key(&snapshot.log_id()) {
            warn!(
                "Already exist vector index snapshot {} {}",
                snapshot.index_id(),
                snapshot.log_id()
            );
            return false;
        }
        inner.insert(snapshot.log_id(), snapshot);
        true
    }

    /// Remove the exact `(index_id, log_id)` entry.
    pub fn delete(&self, snapshot: &Arc<SnapshotMeta>) {
        let mut guard = self.snapshots.lock();
        if let Some(inner) = guard.get_mut(&snapshot.index_id()) {
            inner.remove(&snapshot.log_id());
        }
    }

    /// Drop every entry of one index.
    pub fn delete_all(&self, index_id: u64) {
        self.snapshots.lock().remove(&index_id);
    }

    pub fn get_last(&self, index_id: u64) -> Option<Arc<SnapshotMeta>> {
        self.snapshots
            .lock()
            .get(&index_id)
            .and_then(|inner| inner.values().next_back().cloned())
    }

    /// All snapshots of one index, ascending by log id.
    pub fn get_all(&self, index_id: u64) -> Vec<Arc<SnapshotMeta>> {
        self.snapshots
            .lock()
            .get(&index_id)
            .map(|inner| inner.values().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff a snapshot at least as new as `log_id` is admitted.
    pub fn is_exist(&self, index_id: u64, log_id: u64) -> bool {
        self.get_last(index_id)
            .map(|last| log_id <= last.log_id())
            .unwrap_or(false)
    }

    pub fn has_snapshot(&self, index_id: u64) -> bool {
        self.get_last(index_id).is_some()
    }
}
