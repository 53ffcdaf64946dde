//! Primitive types shared by the swarmscan packages.
//!
//! The crawler works with two kinds of 160-bit identifiers: [`NodeId`] for
//! DHT nodes and [`InfoHash`] for torrents. Both are plain 20-byte values
//! that are rendered as 40-character lowercase hexadecimal strings, and both
//! live in the same Kademlia key space, so the XOR distance between a node
//! id and an infohash is well defined.
//!
//! [`Endpoint`] is the network address value type used everywhere a remote
//! node or peer is identified.
use std::time::Duration;

pub mod endpoint;
pub mod info_hash;
pub mod node_id;

/// Duration since the Unix Epoch. Every persisted timestamp uses this type.
pub type DurationSinceUnixEpoch = Duration;

/// Error returned when a 40-character hexadecimal identifier cannot be
/// parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The input length is not exactly 40 characters.
    #[error("invalid identifier length: expected 40 hex characters, got {len}")]
    InvalidLength { len: usize },

    /// The input contains a character outside `[0-9a-fA-F]`.
    #[error("invalid identifier encoding: not a hexadecimal string")]
    InvalidEncoding,
}
