//! Configuration module for the vector node
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};

use vector::index::IndexParameter;
use vector::region::Region;
use vector::VectorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// gRPC server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Raft membership configuration
    #[serde(default)]
    pub raft: RaftConfig,
    /// Vector index subsystem configuration
    #[serde(default)]
    pub vector: VectorConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Regions served by this node
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
        }
    }
}

/// gRPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host, also advertised in snapshot URIs
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Raft membership configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RaftConfig {
    /// Peer addresses of the group, including this node
    #[serde(default)]
    pub peers: Vec<String>,
    /// Whether this node starts as the group leader
    #[serde(default)]
    pub leader: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One region served by this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region id, doubles as the vector index id
    pub id: u64,
    /// Vector dimension of the region's index
    pub dimension: usize,
}

impl RegionConfig {
    /// Region with the key range derived from the region id.
    pub fn to_region(&self) -> Region {
        let start_key = self.id.to_be_bytes().to_vec();
        // Data keys are the region prefix plus an 8-byte vector id; a
        // longer all-0xff suffix bounds them without overflow.
        let mut end_key = start_key.clone();
        end_key.extend_from_slice(&[0xff; 9]);
        Region::new(
            self.id,
            start_key,
            end_key,
            IndexParameter::Flat {
                dimension: self.dimension,
            },
        )
    }
}

// Default value functions

fn default_node_id() -> String {
    "node1".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    20400
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.node_id, "node1");
        assert_eq!(config.server.port, 20400);
        assert!(config.regions.is_empty());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
node:
  node_id: node2
server:
  host: 10.0.0.1
  port: 20500
raft:
  peers: ["10.0.0.1:20500", "10.0.0.2:20500"]
  leader: true
vector:
  index_path: /tmp/vector-index
  file_transport_chunk_size: 1048576
regions:
  - id: 42
    dimension: 8
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.node.node_id, "node2");
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.raft.peers.len(), 2);
        assert!(config.raft.leader);
        assert_eq!(config.vector.file_transport_chunk_size, 1048576);
        assert_eq!(config.regions.len(), 1);
        assert_eq!(config.regions[0].dimension, 8);

        let region = config.regions[0].to_region();
        assert_eq!(region.id(), 42);
        assert!(region.start_key() < region.end_key());
    }

    #[test]
    fn test_bad_yaml_rejected() {
        assert!(Config::from_yaml("server: [not, a, map]").is_err());
    }
}
