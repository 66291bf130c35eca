//! Node Service implementation
//!
//! Snapshot descriptor exchange between peers: leaders push install
//! requests, followers advertise their newest snapshot for pulls.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{error, info};

use proto::node::node_service_server::NodeService;
use proto::node::{
    GetVectorIndexSnapshotRequest, GetVectorIndexSnapshotResponse,
    InstallVectorIndexSnapshotRequest, InstallVectorIndexSnapshotResponse,
};
use vector::{VectorError, VectorIndexManager};

/// Node Service implementation
pub struct NodeServiceImpl {
    manager: Arc<VectorIndexManager>,
}

impl NodeServiceImpl {
    pub fn new(manager: Arc<VectorIndexManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl NodeService for NodeServiceImpl {
    async fn install_vector_index_snapshot(
        &self,
        request: Request<InstallVectorIndexSnapshotRequest>,
    ) -> Result<Response<InstallVectorIndexSnapshotResponse>, Status> {
        let req = request.into_inner();
        let Some(meta) = req.meta else {
            let err = VectorError::IllegalParameters("missing snapshot meta".into());
            return Ok(Response::new(InstallVectorIndexSnapshotResponse {
                error: Some(err.to_pb()),
            }));
        };

        info!(
            "InstallVectorIndexSnapshot request: index {} log {} uri {}",
            meta.vector_index_id, meta.snapshot_log_index, req.uri
        );

        let error = match self.manager.handle_install_snapshot(&req.uri, &meta).await {
            Ok(()) => None,
            Err(e) => {
                if e.is_benign() {
                    info!("Install snapshot {}: {}", meta.vector_index_id, e);
                } else {
                    error!("Install snapshot {} failed: {}", meta.vector_index_id, e);
                }
                Some(e.to_pb())
            }
        };
        Ok(Response::new(InstallVectorIndexSnapshotResponse { error }))
    }

    async fn get_vector_index_snapshot(
        &self,
        request: Request<GetVectorIndexSnapshotRequest>,
    ) -> Result<Response<GetVectorIndexSnapshotResponse>, Status> {
        let req = request.into_inner();

        let response = match self
            .manager
            .snapshot_manager()
            .handle_pull(req.vector_index_id)
        {
            Ok((uri, meta)) => GetVectorIndexSnapshotResponse {
                error: None,
                uri,
                meta: Some(meta),
            },
            Err(e) => {
                info!(
                    "GetVectorIndexSnapshot {} failed: {}",
                    req.vector_index_id, e
                );
                GetVectorIndexSnapshotResponse {
                    error: Some(e.to_pb()),
                    uri: String::new(),
                    meta: None,
                }
            }
        };
        Ok(Response::new(response))
    }
}
