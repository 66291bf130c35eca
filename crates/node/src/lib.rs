//! Vector node: gRPC services and server wiring
//!
//! Exposes the node-to-node snapshot exchange (`NodeService`) and the
//! chunked file transfer (`FileService`) over tonic, on top of the core
//! subsystem in the `vector` crate.

pub mod config;
pub mod file_service;
pub mod node_service;
pub mod server;
