//! Shared gRPC protocol definitions for node-to-node communication
//!
//! This crate provides protocol definitions for communication between nodes:
//! snapshot descriptor exchange (`node`) and chunked file transfer
//! (`fileservice`). Error codes and wire descriptors shared by both live in
//! `common`.

// Include generated protobuf code
// The include_proto! macro generates a module matching the proto package name
pub mod common {
    tonic::include_proto!("common");
}

pub mod node {
    tonic::include_proto!("node");
}

pub mod fileservice {
    tonic::include_proto!("fileservice");
}
