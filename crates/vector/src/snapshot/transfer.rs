//! Chunked file transfer between peers
//!
//! Files are addressed by `(reader_id, filename, offset, size)` against the
//! reader handle embedded in a snapshot URI of the form
//! `remote://<host>:<port>/<reader_id>`.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tonic::transport::Channel;
use tracing::{debug, info};

use super::{SnapshotManager, SnapshotMeta, TmpDirGuard};
use crate::error::{VectorError, VectorResult};
use proto::common::VectorIndexSnapshotMeta;
use proto::fileservice::file_service_client::FileServiceClient;
use proto::fileservice::{CleanFileReaderRequest, GetFileRequest};
use proto::node::node_service_client::NodeServiceClient;
use proto::node::{
    GetVectorIndexSnapshotRequest, GetVectorIndexSnapshotResponse,
    InstallVectorIndexSnapshotRequest, InstallVectorIndexSnapshotResponse,
};

/// Reader id from a snapshot URI; 0 when the URI is malformed.
pub fn parse_reader_id(uri: &str) -> u64 {
    let segments: Vec<&str> = uri.split('/').collect();
    if segments.len() < 4 {
        return 0;
    }
    segments[3].parse::<u64>().unwrap_or(0)
}

/// Host endpoint from a snapshot URI; `None` when the URI is malformed.
pub fn parse_host(uri: &str) -> Option<SocketAddr> {
    let segments: Vec<&str> = uri.split('/').collect();
    if segments.len() < 4 {
        return None;
    }
    let host_and_port = segments[2];
    if let Ok(addr) = host_and_port.parse() {
        return Some(addr);
    }
    host_and_port.to_socket_addrs().ok()?.next()
}

async fn connect_node(endpoint: SocketAddr) -> VectorResult<NodeServiceClient<Channel>> {
    NodeServiceClient::connect(format!("http://{}", endpoint))
        .await
        .map_err(|e| VectorError::internal(format!("connect {} failed: {}", endpoint, e)))
}

pub(crate) async fn install_vector_index_snapshot(
    endpoint: SocketAddr,
    request: InstallVectorIndexSnapshotRequest,
) -> VectorResult<InstallVectorIndexSnapshotResponse> {
    let mut client = connect_node(endpoint).await?;
    client
        .install_vector_index_snapshot(request)
        .await
        .map(|response| response.into_inner())
        .map_err(|status| {
            VectorError::internal(format!(
                "InstallVectorIndexSnapshot to {} failed: {}",
                endpoint, status
            ))
        })
}

pub(crate) async fn get_vector_index_snapshot(
    endpoint: SocketAddr,
    request: GetVectorIndexSnapshotRequest,
) -> VectorResult<GetVectorIndexSnapshotResponse> {
    let mut client = connect_node(endpoint).await?;
    client
        .get_vector_index_snapshot(request)
        .await
        .map(|response| response.into_inner())
        .map_err(|status| {
            VectorError::internal(format!(
                "GetVectorIndexSnapshot to {} failed: {}",
                endpoint, status
            ))
        })
}

pub(crate) async fn clean_file_reader(endpoint: SocketAddr, reader_id: u64) -> VectorResult<()> {
    let mut client = FileServiceClient::connect(format!("http://{}", endpoint))
        .await
        .map_err(|e| VectorError::internal(format!("connect {} failed: {}", endpoint, e)))?;
    let response = client
        .clean_file_reader(CleanFileReaderRequest { reader_id })
        .await
        .map_err(|status| {
            VectorError::internal(format!("CleanFileReader to {} failed: {}", endpoint, status))
        })?
        .into_inner();
    if let Some(err) = response.error.as_ref().and_then(VectorError::from_pb) {
        return Err(err);
    }
    Ok(())
}

/// Stream one remote file into `path`, chunk by chunk until eof.
async fn fetch_file(
    client: &mut FileServiceClient<Channel>,
    reader_id: u64,
    filename: &str,
    path: &Path,
    chunk_size: u64,
) -> VectorResult<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| VectorError::internal(format!("create {} failed: {}", path.display(), e)))?;

    let mut offset = 0u64;
    loop {
        let request = GetFileRequest {
            reader_id,
            filename: filename.to_string(),
            offset,
            size: chunk_size,
        };
        debug!("GetFileRequest: {:?}", request);

        let response = client
            .get_file(request)
            .await
            .map_err(|status| {
                VectorError::internal(format!("GetFile {} failed: {}", filename, status))
            })?
            .into_inner();
        if let Some(err) = response.error.as_ref().and_then(VectorError::from_pb) {
            return Err(err);
        }

        file.write_all(&response.data).await.map_err(|e| {
            VectorError::internal(format!("write {} failed: {}", path.display(), e))
        })?;

        if response.eof {
            break;
        }
        // A non-eof chunk must carry data, otherwise the loop cannot make
        // progress.
        if response.read_size == 0 {
            return Err(VectorError::internal(format!(
                "GetFile {} returned an empty chunk before eof",
                filename
            )));
        }
        offset += response.read_size;
    }

    file.flush()
        .await
        .map_err(|e| VectorError::internal(format!("flush {} failed: {}", path.display(), e)))
}

impl SnapshotManager {
    /// Fetch every file of a remote snapshot into a fresh local snapshot
    /// directory and admit it. Shared by install-receive and pull.
    pub async fn download(
        &self,
        uri: &str,
        meta: &VectorIndexSnapshotMeta,
    ) -> VectorResult<()> {
        let reader_id = parse_reader_id(uri);
        let endpoint = match parse_host(uri) {
            Some(endpoint) if reader_id > 0 => endpoint,
            _ => {
                return Err(VectorError::internal(format!(
                    "parse uri {} to reader_id and endpoint error",
                    uri
                )))
            }
        };

        let index_id = meta.vector_index_id;
        let log_id = meta.snapshot_log_index;
        if self.registry.is_exist(index_id, log_id) {
            let msg = format!("vector_index_id {} snapshot_log_index {}", index_id, log_id);
            info!("Already exist vector index snapshot, {}", msg);
            return Err(VectorError::SnapshotExist(msg));
        }

        let tmp_path = self.tmp_path(index_id);
        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path).map_err(|e| {
                VectorError::internal(format!("remove {} failed: {}", tmp_path.display(), e))
            })?;
        }
        fs::create_dir_all(&tmp_path).map_err(|e| {
            VectorError::internal(format!("create {} failed: {}", tmp_path.display(), e))
        })?;
        let mut tmp_guard = TmpDirGuard::new(tmp_path.clone());

        let mut client = FileServiceClient::connect(format!("http://{}", endpoint))
            .await
            .map_err(|e| {
                VectorError::internal(format!(
                    "Init remote file copier failed, endpoint {}: {}",
                    endpoint, e
                ))
            })?;

        for filename in &meta.filenames {
            if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
                return Err(VectorError::internal(format!(
                    "bad filename in snapshot meta: {:?}",
                    filename
                )));
            }
            let filepath = tmp_path.join(filename);
            info!("Get vector index snapshot file: {}", filepath.display());
            fetch_file(&mut client, reader_id, filename, &filepath, self.chunk_size).await?;
        }

        if self.registry.is_exist(index_id, log_id) {
            // Lost the race after the transfer; leave the tmp directory to
            // the next boot cleanup.
            tmp_guard.disarm();
            let msg = format!("vector_index_id {} snapshot_log_index {}", index_id, log_id);
            info!("Already exist vector index snapshot, {}", msg);
            return Err(VectorError::SnapshotExist(msg));
        }

        let new_path = self.snapshot_path(index_id, log_id);
        fs::rename(&tmp_path, &new_path).map_err(|e| {
            VectorError::internal(format!(
                "rename {} -> {} failed: {}",
                tmp_path.display(),
                new_path.display(),
                e
            ))
        })?;
        tmp_guard.disarm();

        let stale = self.registry.get_all(index_id);

        let new_snapshot = Arc::new(SnapshotMeta::new(index_id, &new_path).map_err(|e| {
            VectorError::internal(format!("init snapshot failed, path {}: {}", new_path.display(), e))
        })?);
        if !self.registry.add(new_snapshot.clone()) {
            // The admitted entry owns the directory; this handle must not
            // delete it on drop.
            std::mem::forget(new_snapshot);
            return Err(VectorError::SnapshotExist(format!(
                "vector_index_id {} snapshot_log_index {}",
                index_id, log_id
            )));
        }

        for snapshot in &stale {
            self.registry.delete(snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_uri() {
        let uri = "remote://10.0.0.1:7/9";
        assert_eq!(parse_reader_id(uri), 9);
        assert_eq!(parse_host(uri), Some("10.0.0.1:7".parse().unwrap()));
    }

    #[test]
    fn test_parse_uri_without_port() {
        // The reader segment is well formed but the host is not; callers
        // reject the zero endpoint.
        let uri = "remote://x/9";
        assert_eq!(parse_host(uri), None);
        assert_eq!(parse_reader_id(uri), 9);
    }

    #[test]
    fn test_parse_too_few_segments() {
        let uri = "remote:/9";
        assert_eq!(parse_reader_id(uri), 0);
        assert_eq!(parse_host(uri), None);
    }

    #[test]
    fn test_parse_garbage_reader_id() {
        assert_eq!(parse_reader_id("remote://10.0.0.1:7/9x"), 0);
        assert_eq!(parse_reader_id("remote://10.0.0.1:7/"), 0);
        assert_eq!(parse_reader_id(""), 0);
    }

    #[test]
    fn test_parse_bad_host() {
        assert_eq!(parse_host("remote://not a host/9"), None);
        assert_eq!(parse_host(""), None);
    }

    #[test]
    fn test_parse_extra_segments_uses_third() {
        let uri = "remote://127.0.0.1:20400/15/ignored";
        assert_eq!(parse_reader_id(uri), 15);
        assert_eq!(parse_host(uri), Some("127.0.0.1:20400".parse().unwrap()));
    }
}
