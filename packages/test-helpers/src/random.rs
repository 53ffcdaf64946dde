//! Random fixtures for tests.
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

/// A random alphanumeric string of a given size.
#[must_use]
pub fn string(size: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}

#[must_use]
pub fn node_id() -> NodeId {
    NodeId::random()
}

#[must_use]
pub fn info_hash() -> InfoHash {
    InfoHash::random()
}
