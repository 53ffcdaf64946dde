//! The owning container of the k-buckets.
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::node_id::{NodeId, NODE_ID_BITS};
use swarmscan_primitives::DurationSinceUnixEpoch;

use super::bucket::Bucket;
use super::{DhtNode, NodeStatus};

/// What happened to a candidate offered to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The node was appended to a bucket with room.
    Added,
    /// The node was already present; its endpoint and `last_seen` moved.
    Updated,
    /// A stale member was evicted to make room.
    Replaced { evicted: NodeId },
    /// The bucket is full of members worth keeping, but one questionable
    /// member should be probed. The candidate itself is dropped.
    NeedsProbe { id: NodeId, endpoint: Endpoint },
    /// The bucket is full of good members; the candidate is dropped.
    Discarded,
}

/// A 160-bucket prefix-split Kademlia table.
///
/// Bucket `i` holds nodes whose XOR distance from the local id has exactly
/// `i` leading zero bits; the deepest bucket holds everything at least as
/// close. Only the deepest bucket splits, which keeps the tree a path — the
/// classic home-bucket layout.
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    #[must_use]
    pub fn new(local_id: NodeId, now: DurationSinceUnixEpoch) -> Self {
        Self {
            local_id,
            buckets: vec![Bucket::new(0, now)],
        }
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Total number of nodes across all buckets.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Whether `id` is currently tracked.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].contains(id)
    }

    /// Whether the distance-prefix of `id` routes it into the bucket with
    /// the given prefix length.
    #[must_use]
    pub fn contains_id_in_range(&self, id: &NodeId, prefix_length: usize) -> bool {
        self.local_id.distance(id).shares_prefix(prefix_length)
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        let shared = self
            .local_id
            .distance(id)
            .leading_zeros()
            .unwrap_or(NODE_ID_BITS);
        shared.min(self.buckets.len() - 1)
    }

    /// Routes a candidate into its bucket, splitting the deepest bucket when
    /// it is full and covers the candidate.
    pub fn add_candidate(&mut self, id: NodeId, endpoint: Endpoint, now: DurationSinceUnixEpoch) -> AddOutcome {
        if id == self.local_id {
            return AddOutcome::Discarded;
        }

        loop {
            let index = self.bucket_index(&id);
            let deepest = self.buckets.len() - 1;

            if let Some(node) = self.buckets[index].get_mut(&id) {
                node.endpoint = endpoint;
                node.last_seen = now;
                return AddOutcome::Updated;
            }

            if !self.buckets[index].is_full() {
                self.buckets[index].push(DhtNode::new(id, endpoint, now), now);
                return AddOutcome::Added;
            }

            // the deepest bucket covers the local id's own prefix; it splits
            // instead of evicting
            if index == deepest && self.buckets.len() < NODE_ID_BITS {
                self.split_deepest(now);
                continue;
            }

            if let Some(victim) = self.buckets[index].eviction_candidate().map(|node| node.id) {
                self.buckets[index].remove(&victim, now);
                self.buckets[index].push(DhtNode::new(id, endpoint, now), now);
                return AddOutcome::Replaced { evicted: victim };
            }

            if let Some((probe_id, probe_endpoint)) = self.buckets[index]
                .probe_candidate()
                .map(|node| (node.id, node.endpoint))
            {
                if let Some(node) = self.buckets[index].get_mut(&probe_id) {
                    node.pending_probe = true;
                }
                return AddOutcome::NeedsProbe {
                    id: probe_id,
                    endpoint: probe_endpoint,
                };
            }

            return AddOutcome::Discarded;
        }
    }

    fn split_deepest(&mut self, now: DurationSinceUnixEpoch) {
        let deepest = self.buckets.len() - 1;
        let nodes = self.buckets[deepest].drain();

        self.buckets.push(Bucket::new(self.buckets.len(), now));

        for node in nodes {
            let index = self.bucket_index(&node.id);
            self.buckets[index].push(node, now);
        }
    }

    /// A response from `id` arrived.
    pub fn mark_response(&mut self, id: &NodeId, now: DurationSinceUnixEpoch) {
        let index = self.bucket_index(id);
        if let Some(node) = self.buckets[index].get_mut(id) {
            let was = node.status;
            node.mark_response(now);
            if was != NodeStatus::Good {
                self.buckets[index].touch(now);
            }
        }
    }

    /// A query from `id` arrived.
    pub fn mark_query(&mut self, id: &NodeId, now: DurationSinceUnixEpoch) {
        let index = self.bucket_index(id);
        if let Some(node) = self.buckets[index].get_mut(id) {
            node.mark_query(now);
        }
    }

    /// A query to `id` ran out of retries.
    pub fn mark_timeout(&mut self, id: &NodeId, now: DurationSinceUnixEpoch) {
        let index = self.bucket_index(id);
        if let Some(node) = self.buckets[index].get_mut(id) {
            let was = node.status;
            node.mark_timeout();
            if was != node.status {
                self.buckets[index].touch(now);
            }
        }
    }

    /// Like [`mark_timeout`](Self::mark_timeout), for callers that only know
    /// where they sent the query, not who answered for that address before.
    pub fn mark_timeout_by_endpoint(&mut self, endpoint: &Endpoint, now: DurationSinceUnixEpoch) {
        let id = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.nodes().iter())
            .find(|node| node.endpoint == *endpoint)
            .map(|node| node.id);

        if let Some(id) = id {
            self.mark_timeout(&id, now);
        }
    }

    /// Up to `k` nodes with the smallest XOR distance to `target`, ascending.
    /// Bad nodes are not handed out.
    #[must_use]
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<DhtNode> {
        let mut nodes: Vec<DhtNode> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.nodes().iter())
            .filter(|node| node.status != NodeStatus::Bad)
            .cloned()
            .collect();

        nodes.sort_by_key(|node| node.id.distance(target));
        nodes.truncate(k);
        nodes
    }

    /// The questionable nodes that have no probe outstanding, oldest first.
    #[must_use]
    pub fn probe_targets(&mut self) -> Vec<(NodeId, Endpoint)> {
        let mut targets: Vec<&mut DhtNode> = self
            .buckets
            .iter_mut()
            .flat_map(|bucket| bucket.nodes_mut().iter_mut())
            .filter(|node| node.status == NodeStatus::Questionable && !node.pending_probe)
            .collect();

        targets.sort_by_key(|node| node.last_seen);

        targets
            .into_iter()
            .map(|node| {
                node.pending_probe = true;
                (node.id, node.endpoint)
            })
            .collect()
    }

    /// The prefix lengths of buckets untouched for longer than `max_age`.
    #[must_use]
    pub fn stale_buckets(&self, now: DurationSinceUnixEpoch, max_age: std::time::Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .filter(|bucket| now.saturating_sub(bucket.last_updated()) > max_age)
            .map(Bucket::prefix_length)
            .collect()
    }

    /// A random id falling into the bucket with the given prefix length,
    /// used as a refresh lookup target.
    #[must_use]
    pub fn random_id_in_bucket(&self, prefix_length: usize) -> NodeId {
        let mut id = NodeId::random();

        // first prefix_length bits equal the local id
        for bit in 0..prefix_length.min(NODE_ID_BITS) {
            copy_bit(&self.local_id, &mut id, bit);
        }

        // buckets above the deepest hold ids differing at exactly the next
        // bit, so force it to differ
        if prefix_length + 1 < self.buckets.len() && prefix_length < NODE_ID_BITS {
            flip_bit_away_from(&self.local_id, &mut id, prefix_length);
        }

        id
    }
}

fn copy_bit(from: &NodeId, to: &mut NodeId, bit: usize) {
    let byte = bit / 8;
    let mask = 0x80u8 >> (bit % 8);
    if from.0[byte] & mask == 0 {
        to.0[byte] &= !mask;
    } else {
        to.0[byte] |= mask;
    }
}

fn flip_bit_away_from(local: &NodeId, id: &mut NodeId, bit: usize) {
    let byte = bit / 8;
    let mask = 0x80u8 >> (bit % 8);
    if local.0[byte] & mask == 0 {
        id.0[byte] |= mask;
    } else {
        id.0[byte] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swarmscan_primitives::endpoint::Endpoint;
    use swarmscan_primitives::node_id::NodeId;

    use super::super::BUCKET_SIZE;
    use super::{AddOutcome, RoutingTable};

    fn endpoint() -> Endpoint {
        "192.0.2.1:6881".parse().unwrap()
    }

    fn table() -> RoutingTable {
        RoutingTable::new(NodeId::random(), Duration::ZERO)
    }

    #[test]
    fn the_local_id_should_never_be_added() {
        let mut table = table();
        let local = table.local_id();

        assert_eq!(table.add_candidate(local, endpoint(), Duration::ZERO), AddOutcome::Discarded);
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn a_candidate_should_land_in_a_bucket_matching_its_distance_prefix() {
        let mut table = table();

        for _ in 0..200 {
            table.add_candidate(NodeId::random(), endpoint(), Duration::ZERO);
        }

        for bucket in &table.buckets {
            for node in bucket.nodes() {
                assert!(
                    table.contains_id_in_range(&node.id, bucket.prefix_length()),
                    "node {} escaped its bucket",
                    node.id
                );
            }
        }
    }

    #[test]
    fn adding_the_same_id_twice_should_update_not_duplicate() {
        let mut table = table();
        let id = NodeId::random();

        assert_eq!(table.add_candidate(id, endpoint(), Duration::ZERO), AddOutcome::Added);
        assert_eq!(
            table.add_candidate(id, "192.0.2.9:1000".parse().unwrap(), Duration::from_secs(1)),
            AddOutcome::Updated
        );
        assert_eq!(table.node_count(), 1);
    }

    #[test]
    fn filling_the_table_should_split_the_deepest_bucket_and_keep_every_node() {
        let mut table = table();
        let mut added = 0;

        for _ in 0..500 {
            if matches!(
                table.add_candidate(NodeId::random(), endpoint(), Duration::ZERO),
                AddOutcome::Added
            ) {
                added += 1;
            }
        }

        assert!(table.bucket_count() > 1, "random ids should force at least one split");
        assert_eq!(table.node_count(), added);
    }

    #[test]
    fn closest_should_return_ascending_unique_nodes() {
        let mut table = table();

        for _ in 0..300 {
            table.add_candidate(NodeId::random(), endpoint(), Duration::ZERO);
        }

        let target = NodeId::random();
        let closest = table.closest(&target, BUCKET_SIZE);

        assert!(closest.len() <= BUCKET_SIZE);
        assert!(closest
            .windows(2)
            .all(|pair| pair[0].id.distance(&target) < pair[1].id.distance(&target)));
    }

    #[test]
    fn a_full_bucket_with_a_bad_member_should_replace_it() {
        let mut table = table();

        // far bucket: ids whose first bit differs from the local id
        let mut far_ids = Vec::new();
        while far_ids.len() < BUCKET_SIZE + 1 {
            let id = NodeId::random();
            if !table.contains_id_in_range(&id, 1) {
                far_ids.push(id);
            }
        }

        // split the deepest bucket so bucket 0 stops covering the local id
        let mut near_added = 0;
        while near_added <= BUCKET_SIZE {
            let id = NodeId::random();
            if table.contains_id_in_range(&id, 1)
                && matches!(table.add_candidate(id, endpoint(), Duration::ZERO), AddOutcome::Added)
            {
                near_added += 1;
            }
        }

        for id in far_ids.iter().take(BUCKET_SIZE) {
            table.add_candidate(*id, endpoint(), Duration::ZERO);
        }

        // mark one far node bad
        let victim = far_ids[0];
        table.mark_timeout(&victim, Duration::ZERO);
        table.mark_timeout(&victim, Duration::ZERO);

        let outcome = table.add_candidate(far_ids[BUCKET_SIZE], endpoint(), Duration::ZERO);

        assert_eq!(outcome, AddOutcome::Replaced { evicted: victim });
    }

    #[test]
    fn a_refresh_id_should_fall_into_its_bucket_range() {
        let mut table = table();

        for _ in 0..300 {
            table.add_candidate(NodeId::random(), endpoint(), Duration::ZERO);
        }

        for prefix_length in 0..table.bucket_count() {
            let id = table.random_id_in_bucket(prefix_length);
            assert!(table.contains_id_in_range(&id, prefix_length));
        }
    }

    #[test]
    fn stale_buckets_should_be_reported_for_refresh() {
        let mut table = table();
        table.add_candidate(NodeId::random(), endpoint(), Duration::ZERO);

        let stale = table.stale_buckets(Duration::from_secs(16 * 60), Duration::from_secs(15 * 60));

        assert_eq!(stale.len(), table.bucket_count());
    }
}
