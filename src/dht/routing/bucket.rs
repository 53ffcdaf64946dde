//! A single k-bucket.
use swarmscan_primitives::node_id::NodeId;
use swarmscan_primitives::DurationSinceUnixEpoch;

use super::{DhtNode, NodeStatus, BUCKET_SIZE};

/// Up to [`BUCKET_SIZE`] nodes sharing a distance prefix with the local id.
///
/// `last_updated` advances on every structural change and drives the
/// 15-minute refresh cycle. Nodes keep their insertion order; reads never
/// reorder them.
#[derive(Debug, Clone)]
pub struct Bucket {
    prefix_length: usize,
    nodes: Vec<DhtNode>,
    last_updated: DurationSinceUnixEpoch,
}

impl Bucket {
    #[must_use]
    pub fn new(prefix_length: usize, now: DurationSinceUnixEpoch) -> Self {
        Self {
            prefix_length,
            nodes: Vec::with_capacity(BUCKET_SIZE),
            last_updated: now,
        }
    }

    #[must_use]
    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    #[must_use]
    pub fn nodes(&self) -> &[DhtNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [DhtNode] {
        &mut self.nodes
    }

    #[must_use]
    pub fn last_updated(&self) -> DurationSinceUnixEpoch {
        self.last_updated
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nodes.len() >= BUCKET_SIZE
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|node| node.id == *id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut DhtNode> {
        self.nodes.iter_mut().find(|node| node.id == *id)
    }

    /// Appends a node. The caller checks fullness and duplicates first.
    pub fn push(&mut self, node: DhtNode, now: DurationSinceUnixEpoch) {
        debug_assert!(!self.is_full());
        debug_assert!(!self.contains(&node.id));

        self.nodes.push(node);
        self.last_updated = now;
    }

    pub fn remove(&mut self, id: &NodeId, now: DurationSinceUnixEpoch) -> Option<DhtNode> {
        let index = self.nodes.iter().position(|node| node.id == *id)?;
        self.last_updated = now;
        Some(self.nodes.remove(index))
    }

    /// Marks a structural or liveness change without membership change.
    pub fn touch(&mut self, now: DurationSinceUnixEpoch) {
        self.last_updated = now;
    }

    /// Drains every node out of the bucket, for redistribution on split.
    pub fn drain(&mut self) -> Vec<DhtNode> {
        std::mem::take(&mut self.nodes)
    }

    /// The node to evict when the bucket is full and a replacement arrived:
    /// the least recently seen node of the worst staleness class. Returns
    /// `None` when every member is good or fresh enough to keep.
    #[must_use]
    pub fn eviction_candidate(&self) -> Option<&DhtNode> {
        self.least_recently_seen(NodeStatus::Bad)
            .or_else(|| self.least_recently_seen_probed_questionable())
    }

    /// The least recently seen questionable node with no probe outstanding,
    /// the one to ping before giving its slot away.
    #[must_use]
    pub fn probe_candidate(&self) -> Option<&DhtNode> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Questionable && !node.pending_probe)
            .min_by_key(|node| node.last_seen)
    }

    fn least_recently_seen(&self, status: NodeStatus) -> Option<&DhtNode> {
        self.nodes
            .iter()
            .filter(|node| node.status == status)
            .min_by_key(|node| node.last_seen)
    }

    /// A questionable node whose probe was already sent and never answered
    /// is fair game for replacement.
    fn least_recently_seen_probed_questionable(&self) -> Option<&DhtNode> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Questionable && node.pending_probe)
            .min_by_key(|node| node.last_seen)
    }
}
