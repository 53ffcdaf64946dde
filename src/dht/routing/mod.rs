//! The Kademlia routing table.
//!
//! Nodes live in prefix-indexed k-buckets; the bucket a node belongs to is
//! determined by how many leading bits its XOR distance from the local id
//! shares with zero. The deepest bucket always covers the local id's own
//! range and is the only one that splits.
pub mod bucket;
pub mod table;

use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::node_id::NodeId;
use swarmscan_primitives::DurationSinceUnixEpoch;

/// Maximum number of nodes in a k-bucket (k=8 in the `BitTorrent` DHT).
pub const BUCKET_SIZE: usize = 8;

/// Liveness classification of a routing table node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Observed but never queried.
    Unknown,
    /// Responded to the most recent query.
    Good,
    /// Missed a query; a probe decides its fate.
    Questionable,
    /// Missed consecutive queries; first in line for eviction.
    Bad,
}

/// A node as tracked by the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtNode {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub status: NodeStatus,
    pub last_seen: DurationSinceUnixEpoch,
    /// Set while a liveness probe for this node is outstanding.
    pub pending_probe: bool,
}

impl DhtNode {
    #[must_use]
    pub fn new(id: NodeId, endpoint: Endpoint, now: DurationSinceUnixEpoch) -> Self {
        Self {
            id,
            endpoint,
            status: NodeStatus::Unknown,
            last_seen: now,
            pending_probe: false,
        }
    }

    /// A response arrived: the node is good again, whatever it was before.
    pub fn mark_response(&mut self, now: DurationSinceUnixEpoch) {
        self.status = NodeStatus::Good;
        self.pending_probe = false;
        self.last_seen = now;
    }

    /// The node sent us a query; that proves reachability of the sender but
    /// not that it answers, so only `last_seen` moves.
    pub fn mark_query(&mut self, now: DurationSinceUnixEpoch) {
        self.last_seen = now;
    }

    /// A query to the node ran out of retries.
    pub fn mark_timeout(&mut self) {
        self.pending_probe = false;
        self.status = match self.status {
            NodeStatus::Unknown | NodeStatus::Good => NodeStatus::Questionable,
            NodeStatus::Questionable | NodeStatus::Bad => NodeStatus::Bad,
        };
    }
}
