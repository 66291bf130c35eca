//! Snapshot lifecycle and peer-to-peer transfer
//!
//! A snapshot is one directory `<index_root>/<index_id>/snapshot_<020d>`
//! holding the serialized index plus a `meta` file with the frozen log id.
//! [`SnapshotManager`] owns the registry of admitted snapshots, produces new
//! ones through the fork-based writer, and moves them between peers:
//!
//! - leader push: advertise a reader handle, call `InstallVectorIndexSnapshot`
//!   on the follower, which pulls the files chunk by chunk;
//! - follower pull: probe all peers with `GetVectorIndexSnapshot` and
//!   download from the one with the highest snapshot log id.

mod meta;
mod reader;
mod registry;
mod transfer;
mod writer;

pub use meta::{snapshot_dir_name, SnapshotMeta, SNAPSHOT_DIR_PREFIX};
pub use reader::FileReaderRegistry;
pub use registry::SnapshotRegistry;
pub use transfer::{parse_host, parse_reader_id};

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::config::VectorConfig;
use crate::error::{VectorError, VectorResult};
use crate::raft::RaftEngine;
use crate::wal::WalManager;
use proto::common::VectorIndexSnapshotMeta;
use proto::node::GetVectorIndexSnapshotRequest;

pub struct SnapshotManager {
    index_root: PathBuf,
    host: String,
    port: u16,
    chunk_size: u64,
    registry: SnapshotRegistry,
    readers: Arc<FileReaderRegistry>,
    raft: Arc<dyn RaftEngine>,
    wal_manager: Arc<dyn WalManager>,
}

impl SnapshotManager {
    pub fn new(
        config: &VectorConfig,
        host: String,
        port: u16,
        readers: Arc<FileReaderRegistry>,
        raft: Arc<dyn RaftEngine>,
        wal_manager: Arc<dyn WalManager>,
    ) -> Self {
        Self {
            index_root: config.index_path.clone(),
            host,
            port,
            chunk_size: config.file_transport_chunk_size,
            registry: SnapshotRegistry::new(),
            readers,
            raft,
            wal_manager,
        }
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn readers(&self) -> &Arc<FileReaderRegistry> {
        &self.readers
    }

    pub fn has_snapshot(&self, index_id: u64) -> bool {
        self.registry.has_snapshot(index_id)
    }

    /// Admit every snapshot directory found on disk for the given regions.
    /// Leftover `tmp_*` directories from interrupted writes are removed; a
    /// directory that looks like a snapshot but fails to parse aborts init.
    pub fn init(&self, region_ids: &[u64]) -> VectorResult<()> {
        for &index_id in region_ids {
            let parent = self.parent_path(index_id);
            let entries = match fs::read_dir(&parent) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries {
                let entry = entry.map_err(|e| {
                    VectorError::internal(format!("read {} failed: {}", parent.display(), e))
                })?;
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.contains("tmp") {
                    info!("Remove leftover snapshot tmp dir {}", entry.path().display());
                    let _ = fs::remove_dir_all(entry.path());
                    continue;
                }
                let snapshot = Arc::new(SnapshotMeta::new(index_id, entry.path())?);
                if !self.registry.add(snapshot.clone()) {
                    std::mem::forget(snapshot);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn parent_path(&self, index_id: u64) -> PathBuf {
        self.index_root.join(index_id.to_string())
    }

    pub(crate) fn tmp_path(&self, index_id: u64) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        self.parent_path(index_id).join(format!("tmp_{}", nanos))
    }

    pub(crate) fn snapshot_path(&self, index_id: u64, log_id: u64) -> PathBuf {
        self.parent_path(index_id).join(snapshot_dir_name(log_id))
    }

    fn check_local_endpoint(&self) -> VectorResult<()> {
        if self.host.is_empty() || self.port == 0 {
            return Err(VectorError::IllegalParameters(
                "parse server host or port error".into(),
            ));
        }
        Ok(())
    }

    fn local_uri(&self, reader_id: u64) -> String {
        format!("remote://{}:{}/{}", self.host, self.port, reader_id)
    }

    fn transfer_meta(snapshot: &SnapshotMeta) -> VectorIndexSnapshotMeta {
        VectorIndexSnapshotMeta {
            vector_index_id: snapshot.index_id(),
            snapshot_log_index: snapshot.log_id(),
            filenames: snapshot.file_names().to_vec(),
        }
    }

    /// Push the newest local snapshot of `index_id` to one peer.
    pub async fn install_to_peer(&self, endpoint: SocketAddr, index_id: u64) -> VectorResult<()> {
        let start = Instant::now();

        let last = self.registry.get_last(index_id).ok_or_else(|| {
            VectorError::SnapshotNotFound(format!("vector index {}", index_id))
        })?;
        info!("last vector index snapshot: {}", last.path().display());

        self.check_local_endpoint()?;
        let reader_id = self.readers.add(last.clone());
        let request = proto::node::InstallVectorIndexSnapshotRequest {
            uri: self.local_uri(reader_id),
            meta: Some(Self::transfer_meta(&last)),
        };

        let result = transfer::install_vector_index_snapshot(endpoint, request).await;
        // The handle is removed on every exit; reference counting keeps the
        // snapshot alive for chunks still in flight.
        self.readers.delete(reader_id);

        let response = result?;
        if let Some(err) = response.error.as_ref().and_then(VectorError::from_pb) {
            return Err(err);
        }

        info!(
            "Install vector index snapshot {} to {} finish, elapsed {}ms",
            index_id,
            endpoint,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Push the newest local snapshot to every other peer of the group.
    /// Per-peer failures are logged and do not abort the loop.
    pub async fn install_to_followers(&self, index_id: u64) -> VectorResult<()> {
        let start = Instant::now();
        let node = self
            .raft
            .node(index_id)
            .ok_or_else(|| VectorError::RaftNotFound(format!("vector index {}", index_id)))?;
        let self_peer = node.self_peer();

        for peer in node.peers() {
            if peer == self_peer {
                continue;
            }
            match self.install_to_peer(peer, index_id).await {
                Ok(()) => {}
                Err(e) if e.is_benign() => {
                    info!("vector index {} peer {}: {}", index_id, peer, e);
                }
                Err(e) => {
                    error!(
                        "Install vector index snapshot {} to {} failed: {}",
                        index_id, peer, e
                    );
                }
            }
        }

        info!(
            "Install vector index snapshot {} to all followers finish, elapsed {}ms",
            index_id,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Probe all peers and download the newest advertised snapshot.
    pub async fn pull_last_from_peers(&self, index_id: u64) -> VectorResult<()> {
        let start = Instant::now();
        let node = self
            .raft
            .node(index_id)
            .ok_or_else(|| VectorError::RaftNotFound(format!("vector index {}", index_id)))?;
        let self_peer = node.self_peer();

        let mut max_snapshot_log_index = 0u64;
        let mut best = None;
        for peer in node.peers() {
            if peer == self_peer {
                continue;
            }
            let request = GetVectorIndexSnapshotRequest {
                vector_index_id: index_id,
            };
            let response = match transfer::get_vector_index_snapshot(peer, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Probe snapshot of {} on {} failed: {}", index_id, peer, e);
                    continue;
                }
            };
            if response.error.as_ref().and_then(VectorError::from_pb).is_some() {
                continue;
            }
            let log_id = response
                .meta
                .as_ref()
                .map(|meta| meta.snapshot_log_index)
                .unwrap_or(0);
            if log_id > max_snapshot_log_index {
                max_snapshot_log_index = log_id;
                best = Some((peer, response));
            }
        }

        let Some((endpoint, response)) = best else {
            info!("Other peers not exist vector index snapshot {}", index_id);
            return Ok(());
        };
        let meta = response
            .meta
            .ok_or_else(|| VectorError::internal("snapshot response missing meta"))?;

        let downloaded = self.download(&response.uri, &meta).await;

        // Release the peer-side reader handle whatever the download did.
        let reader_id = parse_reader_id(&response.uri);
        if reader_id > 0 {
            if let Err(e) = transfer::clean_file_reader(endpoint, reader_id).await {
                warn!("Clean file reader {} on {} failed: {}", reader_id, endpoint, e);
            }
        }

        match downloaded {
            Ok(()) => {}
            Err(e) if e.is_benign() => {
                info!("Pull vector index snapshot {}: {}", index_id, e);
            }
            Err(e) => {
                error!(
                    "Pull vector index snapshot {} from {} failed: {}",
                    index_id, endpoint, e
                );
                return Err(e);
            }
        }

        info!(
            "Pull vector index snapshot {} finish, elapsed {}ms",
            index_id,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Peer side of the pull: expose the newest local snapshot through a
    /// fresh reader handle. The puller releases the handle when done.
    pub fn handle_pull(&self, index_id: u64) -> VectorResult<(String, VectorIndexSnapshotMeta)> {
        let last = self.registry.get_last(index_id).ok_or_else(|| {
            VectorError::SnapshotNotFound(format!("vector index {}", index_id))
        })?;
        info!("last vector index snapshot: {}", last.path().display());

        self.check_local_endpoint()?;
        let reader_id = self.readers.add(last.clone());
        Ok((self.local_uri(reader_id), Self::transfer_meta(&last)))
    }
}

/// Removes a freshly created tmp directory on drop unless disarmed.
pub(crate) struct TmpDirGuard {
    path: PathBuf,
    armed: bool,
}

impl TmpDirGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TmpDirGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
