//! Candidate bookkeeping for iterative lookups.
//!
//! An iterative lookup keeps a distance-ordered set of candidates, queries
//! the closest unqueried ones a few at a time and folds the nodes each
//! response returns back into the set. [`LookupSet`] is the bookkeeping
//! half; the engine drives the I/O.
use std::collections::BTreeMap;

use swarmscan_primitives::node_id::{Distance, NodeId};

use super::messages::NodeInfo;
use super::routing::BUCKET_SIZE;

/// Queries in flight per lookup round.
pub const ALPHA: usize = 3;

/// Hard cap on queries per lookup.
pub const LOOKUP_BUDGET: usize = 64;

/// Candidate set capacity.
const CAPACITY: usize = 8 * BUCKET_SIZE;

struct Candidate {
    node: NodeInfo,
    queried: bool,
}

/// The distance-ordered candidate set of one lookup.
pub struct LookupSet {
    target: NodeId,
    candidates: BTreeMap<Distance, Candidate>,
}

impl LookupSet {
    #[must_use]
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            candidates: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Folds a discovered node into the set. Far-away candidates fall off
    /// the end once the set is at capacity. Returns whether the node entered
    /// the set as a new closest-k improvement.
    pub fn insert(&mut self, node: NodeInfo) -> bool {
        let distance = node.id.distance(&self.target);

        if self.candidates.contains_key(&distance) {
            return false;
        }

        let improves = match self.kth_distance(BUCKET_SIZE) {
            Some(kth) => distance < kth,
            None => true,
        };

        self.candidates.insert(distance, Candidate { node, queried: false });

        if self.candidates.len() > CAPACITY {
            self.candidates.pop_last();
        }

        improves
    }

    /// The closest unqueried candidates, up to `alpha`, marked queried.
    pub fn next_batch(&mut self, alpha: usize) -> Vec<NodeInfo> {
        let mut batch = Vec::with_capacity(alpha);

        for candidate in self.candidates.values_mut() {
            if batch.len() >= alpha {
                break;
            }
            if !candidate.queried {
                candidate.queried = true;
                batch.push(candidate.node);
            }
        }

        batch
    }

    /// Whether every candidate within the closest `k` has been queried, the
    /// lookup's convergence condition.
    #[must_use]
    pub fn converged(&self, k: usize) -> bool {
        self.candidates.values().take(k).all(|candidate| candidate.queried)
    }

    /// The `k` closest nodes seen so far, ascending by distance.
    #[must_use]
    pub fn closest(&self, k: usize) -> Vec<NodeInfo> {
        self.candidates.values().take(k).map(|candidate| candidate.node).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn kth_distance(&self, k: usize) -> Option<Distance> {
        self.candidates.keys().nth(k.saturating_sub(1)).copied()
    }
}
