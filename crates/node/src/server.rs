//! gRPC server wiring for the node-to-node services

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use crate::file_service::FileServiceImpl;
use crate::node_service::NodeServiceImpl;
use proto::fileservice::file_service_server::FileServiceServer;
use proto::node::node_service_server::NodeServiceServer;
use vector::snapshot::FileReaderRegistry;
use vector::VectorIndexManager;

/// Router carrying both node-to-node services. Tests serve it on an
/// ephemeral listener; `serve` binds the configured address.
pub fn build_router(
    manager: Arc<VectorIndexManager>,
    readers: Arc<FileReaderRegistry>,
) -> Router {
    Server::builder()
        .add_service(NodeServiceServer::new(NodeServiceImpl::new(manager)))
        .add_service(FileServiceServer::new(FileServiceImpl::new(readers)))
}

pub async fn serve(
    addr: SocketAddr,
    manager: Arc<VectorIndexManager>,
    readers: Arc<FileReaderRegistry>,
) -> anyhow::Result<()> {
    info!("Starting gRPC server on {}", addr);
    build_router(manager, readers).serve(addr).await?;
    Ok(())
}
