//! Core configuration for the vector index subsystem

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options recognized by the vector index subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Root directory holding per-index snapshot directories.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    /// Whether followers keep a materialized index after rebuild.
    #[serde(default = "default_enable_follower_hold_index")]
    pub enable_follower_hold_index: bool,
    /// Worker count for boot-time parallel load-or-build.
    #[serde(default = "default_load_or_build_concurrency")]
    pub load_or_build_vector_index_concurrency: usize,
    /// Row batch size when building an index from the primary store.
    #[serde(default = "default_build_batch_size")]
    pub build_vector_index_batch_size: usize,
    /// Chunk size in bytes for peer snapshot file transfer.
    #[serde(default = "default_chunk_size")]
    pub file_transport_chunk_size: u64,
    /// Scrub loop period in seconds.
    #[serde(default = "default_scrub_interval_s")]
    pub scrub_vector_index_interval_s: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            enable_follower_hold_index: default_enable_follower_hold_index(),
            load_or_build_vector_index_concurrency: default_load_or_build_concurrency(),
            build_vector_index_batch_size: default_build_batch_size(),
            file_transport_chunk_size: default_chunk_size(),
            scrub_vector_index_interval_s: default_scrub_interval_s(),
        }
    }
}

impl VectorConfig {
    /// Get scrub period as Duration
    pub fn scrub_interval(&self) -> Duration {
        Duration::from_secs(self.scrub_vector_index_interval_s)
    }
}

// Default value functions

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}

fn default_enable_follower_hold_index() -> bool {
    true
}

fn default_load_or_build_concurrency() -> usize {
    10
}

fn default_build_batch_size() -> usize {
    10000
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024 // 4MB
}

fn default_scrub_interval_s() -> u64 {
    60
}
