//! Replicated vector index subsystem
//!
//! Keeps per-region in-memory vector indexes durably checkpointed and
//! replay-consistent with the Raft write-ahead log:
//!
//! - [`snapshot`]: point-in-time capture of a live index (fork-based),
//!   an on-disk snapshot registry, and peer-to-peer snapshot transfer
//!   over a chunked file protocol.
//! - [`manager`]: index materialization (load from snapshot + WAL tail
//!   replay, or full rebuild from the primary store) and the periodic
//!   scrub policy loop.
//! - [`index`]: the in-memory index abstraction consumed by everything
//!   above, plus the brute-force flat implementation.
//!
//! Raft consensus, the primary key-value engine, and the query path are
//! external collaborators reached through the traits in [`raft`], [`kv`],
//! [`wal`] and [`meta`].

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod kv;
pub mod manager;
pub mod meta;
pub mod raft;
pub mod region;
pub mod snapshot;
pub mod wal;

pub use config::VectorConfig;
pub use error::{VectorError, VectorResult};
pub use manager::{spawn_rebuild, start_scrubber, VectorIndexManager};
pub use region::Region;
pub use snapshot::SnapshotManager;

/// Identifier of one replicated vector index instance (the region id).
pub type IndexId = u64;

/// Raft applied-log-index value used as a snapshot's monotonic version.
pub type LogId = u64;
