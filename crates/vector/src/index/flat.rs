//! Brute-force flat vector index
//!
//! Exact nearest-neighbor search by linear scan over squared L2 distance.
//! Rebuilds are never needed (the structure carries no approximation debt),
//! so only the snapshot lag heuristic is live.

use std::collections::HashMap;
use std::fs;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{IndexStatus, VectorIndex};
use crate::error::{VectorError, VectorResult};
use proto::common::VectorWithId;

/// Snapshot again once the WAL runs this far ahead of the last snapshot.
const SAVE_LOG_GAP: u64 = 10_000;

/// On-disk image of a flat index. Rows are sorted by id so two saves of the
/// same state produce identical bytes.
#[derive(Serialize, Deserialize)]
struct FlatIndexFile {
    dimension: usize,
    rows: Vec<(u64, Vec<f32>)>,
}

#[derive(Debug)]
pub struct FlatIndex {
    id: u64,
    dimension: usize,
    vectors: RwLock<HashMap<u64, Vec<f32>>>,
    apply_log_index: AtomicU64,
    snapshot_log_index: AtomicU64,
    snapshot_doing: AtomicBool,
    status: AtomicU8,
    version: AtomicU32,
}

impl FlatIndex {
    pub fn new(id: u64, dimension: usize) -> Self {
        Self {
            id,
            dimension,
            vectors: RwLock::new(HashMap::new()),
            apply_log_index: AtomicU64::new(0),
            snapshot_log_index: AtomicU64::new(0),
            snapshot_doing: AtomicBool::new(false),
            status: AtomicU8::new(IndexStatus::None as u8),
            version: AtomicU32::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn contains(&self, id: u64) -> bool {
        self.vectors.read().contains_key(&id)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

impl VectorIndex for FlatIndex {
    fn id(&self) -> u64 {
        self.id
    }

    fn upsert(&self, vectors: Vec<VectorWithId>) -> VectorResult<()> {
        for vector in &vectors {
            if vector.values.len() != self.dimension {
                return Err(VectorError::IllegalParameters(format!(
                    "vector {} dimension {} does not match index dimension {}",
                    vector.id,
                    vector.values.len(),
                    self.dimension
                )));
            }
        }

        let mut guard = self.vectors.write();
        for vector in vectors {
            guard.insert(vector.id, vector.values);
        }
        Ok(())
    }

    fn delete(&self, ids: &[u64]) -> VectorResult<()> {
        let mut guard = self.vectors.write();
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], topk: usize) -> VectorResult<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(VectorError::IllegalParameters(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let guard = self.vectors.read();
        let mut scored: Vec<(u64, f32)> = guard
            .iter()
            .map(|(id, values)| (*id, squared_l2(query, values)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(topk);
        Ok(scored)
    }

    fn save(&self, path: &Path) -> VectorResult<()> {
        // Runs in the forked child while the parent holds the write barrier:
        // no mutator can be mid-flight, but the inherited lock word reads as
        // exclusively held, so a read guard would deadlock. Go through the
        // raw data pointer; callers guarantee no concurrent mutation.
        let map = unsafe { &*self.vectors.data_ptr() };
        let rows = {
            let mut rows: Vec<(u64, Vec<f32>)> =
                map.iter().map(|(id, values)| (*id, values.clone())).collect();
            rows.sort_by_key(|(id, _)| *id);
            rows
        };

        let file = FlatIndexFile {
            dimension: self.dimension,
            rows,
        };
        let encoded = bincode::serde::encode_to_vec(&file, bincode::config::standard())
            .map_err(|e| VectorError::internal(format!("encode flat index failed: {}", e)))?;
        fs::write(path, encoded)
            .map_err(|e| VectorError::internal(format!("write {} failed: {}", path.display(), e)))
    }

    fn load(&self, path: &Path) -> VectorResult<()> {
        let bytes = fs::read(path)
            .map_err(|e| VectorError::internal(format!("read {} failed: {}", path.display(), e)))?;
        let (file, _) = bincode::serde::decode_from_slice::<FlatIndexFile, _>(
            &bytes,
            bincode::config::standard(),
        )
        .map_err(|e| {
            VectorError::SnapshotInvalid(format!("decode {} failed: {}", path.display(), e))
        })?;

        if file.dimension != self.dimension {
            return Err(VectorError::SnapshotInvalid(format!(
                "snapshot dimension {} does not match index dimension {}",
                file.dimension, self.dimension
            )));
        }

        let mut guard = self.vectors.write();
        guard.clear();
        guard.extend(file.rows);
        Ok(())
    }

    fn count(&self) -> usize {
        self.vectors.read().len()
    }

    fn apply_log_index(&self) -> u64 {
        self.apply_log_index.load(Ordering::Acquire)
    }

    fn set_apply_log_index(&self, log_index: u64) {
        self.apply_log_index.store(log_index, Ordering::Release);
    }

    fn snapshot_log_index(&self) -> u64 {
        self.snapshot_log_index.load(Ordering::Acquire)
    }

    fn set_snapshot_log_index(&self, log_index: u64) {
        self.snapshot_log_index.store(log_index, Ordering::Release);
    }

    fn lock_write(&self) {
        // Held across fork(); the matching unlock_write runs on the same
        // thread in the parent, so the guard is forgotten rather than kept.
        mem::forget(self.vectors.write());
    }

    fn unlock_write(&self) {
        unsafe { self.vectors.force_unlock_write() };
    }

    fn snapshot_doing(&self) -> bool {
        self.snapshot_doing.load(Ordering::Acquire)
    }

    fn set_snapshot_doing(&self, doing: bool) {
        self.snapshot_doing.store(doing, Ordering::Release);
    }

    fn status(&self) -> IndexStatus {
        IndexStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: IndexStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn need_rebuild(&self, _log_lag: u64) -> bool {
        false
    }

    fn need_save(&self, log_lag: u64) -> bool {
        log_lag >= SAVE_LOG_GAP
    }

    fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }
}
