//! The persistent records kept by the storage engine.
//!
//! Identifiers are stored in their 40-character lowercase hex form and
//! timestamps as whole seconds since the Unix Epoch.
use serde::Serialize;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

/// A DHT node observed on the network. Upserted on every observation, never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub endpoint: Endpoint,
    pub first_seen: u64,
    pub last_seen: u64,
    pub ping_count: u64,
    pub query_count: u64,
    pub response_count: u64,
    pub is_responsive: bool,
    pub last_rtt_ms: Option<u32>,
}

/// A torrent infohash seen in a `get_peers` or `announce_peer` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoHashRecord {
    pub info_hash: InfoHash,
    pub first_seen: u64,
    pub last_seen: u64,
    pub announce_count: u64,
    pub peer_count: u64,
    pub has_metadata: bool,
}

/// The parsed info dictionary of a torrent, written once per infohash after
/// a successful metadata download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    pub info_hash: InfoHash,
    pub download_time: u64,
    pub name: String,
    pub total_size: u64,
    pub piece_count: u64,
    pub file_count: u64,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    /// The raw bencoded info dictionary; its SHA-1 equals `info_hash`.
    #[serde(skip_serializing)]
    pub raw_metadata: Vec<u8>,
}

/// A single file inside a torrent, written as a batch together with its
/// [`MetadataRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub info_hash: InfoHash,
    pub path: String,
    pub size: u64,
}

/// A tracker URL observed for a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerRecord {
    pub info_hash: InfoHash,
    pub url: String,
    pub first_seen: u64,
    pub last_seen: u64,
    pub announce_count: u64,
    pub scrape_count: u64,
}

/// Which optional `BitTorrent` capabilities a peer advertised in its
/// handshake reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PeerCapabilities {
    pub supports_dht: bool,
    pub supports_extension_protocol: bool,
    pub supports_fast_protocol: bool,
}

/// A peer that announced or was handed out for a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub info_hash: InfoHash,
    pub endpoint: Endpoint,
    pub peer_id: Option<NodeId>,
    pub first_seen: u64,
    pub last_seen: u64,
    pub capabilities: PeerCapabilities,
    /// Failed metadata download attempts against this peer.
    pub failure_count: u64,
}
