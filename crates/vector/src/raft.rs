//! Raft membership view consumed by snapshot exchange
//!
//! The consensus implementation is external; install/pull only need the
//! peer list of a group and whether this node currently leads it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Membership view of one raft group.
pub trait RaftNode: Send + Sync {
    /// All peers of the group, including this node.
    fn peers(&self) -> Vec<SocketAddr>;

    fn self_peer(&self) -> SocketAddr;

    fn is_leader(&self) -> bool;
}

/// Lookup of the raft group backing one vector index.
pub trait RaftEngine: Send + Sync {
    fn node(&self, index_id: u64) -> Option<Arc<dyn RaftNode>>;
}

/// Fixed membership from configuration, shared by every group. Enough for a
/// standalone node and for tests; a real deployment plugs the consensus
/// layer in through [`RaftEngine`].
pub struct StaticRaftNode {
    self_peer: SocketAddr,
    peers: Vec<SocketAddr>,
    leader: AtomicBool,
}

impl StaticRaftNode {
    pub fn new(self_peer: SocketAddr, peers: Vec<SocketAddr>, leader: bool) -> Self {
        Self {
            self_peer,
            peers,
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }
}

impl RaftNode for StaticRaftNode {
    fn peers(&self) -> Vec<SocketAddr> {
        self.peers.clone()
    }

    fn self_peer(&self) -> SocketAddr {
        self.self_peer
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }
}

pub struct StaticRaftEngine {
    node: Arc<StaticRaftNode>,
}

impl StaticRaftEngine {
    pub fn new(self_peer: SocketAddr, peers: Vec<SocketAddr>, leader: bool) -> Self {
        Self {
            node: Arc::new(StaticRaftNode::new(self_peer, peers, leader)),
        }
    }

    pub fn static_node(&self) -> &Arc<StaticRaftNode> {
        &self.node
    }
}

impl RaftEngine for StaticRaftEngine {
    fn node(&self, _index_id: u64) -> Option<Arc<dyn RaftNode>> {
        Some(self.node.clone())
    }
}
