//! File Service implementation
//!
//! Serves offset-ranged snapshot file reads to peers catching up, addressed
//! by the reader handle advertised in a snapshot URI.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use proto::fileservice::file_service_server::FileService;
use proto::fileservice::{
    CleanFileReaderRequest, CleanFileReaderResponse, GetFileRequest, GetFileResponse,
};
use vector::snapshot::FileReaderRegistry;

/// File Service implementation
pub struct FileServiceImpl {
    readers: Arc<FileReaderRegistry>,
}

impl FileServiceImpl {
    pub fn new(readers: Arc<FileReaderRegistry>) -> Self {
        Self { readers }
    }
}

#[tonic::async_trait]
impl FileService for FileServiceImpl {
    async fn get_file(
        &self,
        request: Request<GetFileRequest>,
    ) -> Result<Response<GetFileResponse>, Status> {
        let req = request.into_inner();

        let readers = self.readers.clone();
        let result = tokio::task::spawn_blocking(move || {
            readers.read_file(req.reader_id, &req.filename, req.offset, req.size)
        })
        .await
        .map_err(|e| Status::internal(format!("join read task failed: {}", e)))?;

        let response = match result {
            Ok((data, eof)) => GetFileResponse {
                error: None,
                read_size: data.len() as u64,
                data,
                eof,
            },
            Err(e) => {
                warn!("GetFile failed: {}", e);
                GetFileResponse {
                    error: Some(e.to_pb()),
                    data: Vec::new(),
                    read_size: 0,
                    eof: false,
                }
            }
        };
        Ok(Response::new(response))
    }

    async fn clean_file_reader(
        &self,
        request: Request<CleanFileReaderRequest>,
    ) -> Result<Response<CleanFileReaderResponse>, Status> {
        let req = request.into_inner();

        if self.readers.delete(req.reader_id) {
            info!("Clean file reader {}", req.reader_id);
        } else {
            // Cleaning an already-released handle is benign.
            warn!("Clean file reader {} not found", req.reader_id);
        }
        Ok(Response::new(CleanFileReaderResponse { error: None }))
    }
}
