//! In-memory vector index abstraction
//!
//! The snapshot and materialization machinery only sees this trait. The
//! brute-force [`FlatIndex`] is the in-tree implementation; approximate
//! index kinds plug in through the same surface.

mod flat;

pub use flat::FlatIndex;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{VectorError, VectorResult};
use proto::common::VectorWithId;

/// Lifecycle status of a live vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexStatus {
    None = 0,
    Normal = 1,
    Building = 2,
    Rebuilding = 3,
    Loading = 4,
    Snapshotting = 5,
    Replaying = 6,
    Error = 7,
    Delete = 8,
}

impl IndexStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => IndexStatus::Normal,
            2 => IndexStatus::Building,
            3 => IndexStatus::Rebuilding,
            4 => IndexStatus::Loading,
            5 => IndexStatus::Snapshotting,
            6 => IndexStatus::Replaying,
            7 => IndexStatus::Error,
            8 => IndexStatus::Delete,
            _ => IndexStatus::None,
        }
    }
}

/// Construction parameters of one index kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexParameter {
    Flat { dimension: usize },
}

/// One in-memory vector index replica.
///
/// `save` must be callable from a forked child process: file I/O only, no
/// locks taken, no logging.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u64;

    fn upsert(&self, vectors: Vec<VectorWithId>) -> VectorResult<()>;

    fn delete(&self, ids: &[u64]) -> VectorResult<()>;

    /// Nearest neighbors of `query`, ascending by distance.
    fn search(&self, query: &[f32], topk: usize) -> VectorResult<Vec<(u64, f32)>>;

    fn save(&self, path: &Path) -> VectorResult<()>;

    fn load(&self, path: &Path) -> VectorResult<()>;

    fn count(&self) -> usize;

    fn apply_log_index(&self) -> u64;
    fn set_apply_log_index(&self, log_index: u64);

    fn snapshot_log_index(&self) -> u64;
    fn set_snapshot_log_index(&self, log_index: u64);

    /// Write barrier around fork(): blocks mutators until `unlock_write`.
    fn lock_write(&self);
    fn unlock_write(&self);

    fn snapshot_doing(&self) -> bool;
    fn set_snapshot_doing(&self, doing: bool);

    fn status(&self) -> IndexStatus;
    fn set_status(&self, status: IndexStatus);

    /// Whether the index wants a full rebuild given the WAL lag behind the
    /// last snapshot.
    fn need_rebuild(&self, log_lag: u64) -> bool;

    /// Whether the index wants a fresh snapshot given the WAL lag.
    fn need_save(&self, log_lag: u64) -> bool;

    fn version(&self) -> u32;
    fn set_version(&self, version: u32);
}

/// Build a fresh index instance from region parameters.
pub fn new_index(
    index_id: u64,
    parameter: &IndexParameter,
) -> VectorResult<Arc<dyn VectorIndex>> {
    match parameter {
        IndexParameter::Flat { dimension } => {
            if *dimension == 0 {
                return Err(VectorError::IllegalParameters(
                    "flat index dimension must be non-zero".into(),
                ));
            }
            Ok(Arc::new(FlatIndex::new(index_id, *dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flat_index() {
        let index = new_index(42, &IndexParameter::Flat { dimension: 4 }).unwrap();
        assert_eq!(index.id(), 42);
        assert_eq!(index.count(), 0);
        assert_eq!(index.status(), IndexStatus::None);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = new_index(42, &IndexParameter::Flat { dimension: 0 }).unwrap_err();
        assert!(matches!(err, VectorError::IllegalParameters(_)));
    }

    #[test]
    fn test_status_from_u8_round_trip() {
        for status in [
            IndexStatus::None,
            IndexStatus::Normal,
            IndexStatus::Building,
            IndexStatus::Rebuilding,
            IndexStatus::Loading,
            IndexStatus::Snapshotting,
            IndexStatus::Replaying,
            IndexStatus::Error,
            IndexStatus::Delete,
        ] {
            assert_eq!(IndexStatus::from_u8(status as u8), status);
        }
    }
}
