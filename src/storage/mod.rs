//! The persistence module.
//!
//! Persistence is implemented with one [`Database`] trait and a single
//! driver, [`Sqlite`](crate::storage::sqlite::Sqlite), backed by one database
//! file on disk.
//!
//! The persistent objects are the crawler's harvest:
//!
//! - **Nodes**: every DHT node ever observed, with responsiveness counters.
//! - **Infohashes**: every torrent seen in a `get_peers` or `announce_peer`
//!   query.
//! - **Metadata** and **files**: the parsed info dictionary of a torrent,
//!   written once after a verified ut_metadata download.
//! - **Trackers** and **peers**: where a torrent can be reached.
//!
//! The trait exposes two disjoint surfaces. The *write surface* is used by
//! the controller's event handlers; every write runs inside a transaction
//! and multi-row writes (metadata plus files) are a single atomic commit.
//! The *read surface* is a query interface with per-entity filter options,
//! consumed by the console and by external readers.
//!
//! All operations are async; a synchronous caller gets the blocking variant
//! by awaiting at the call site.
pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod sqlite;

use async_trait::async_trait;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

use self::error::Error;
use self::models::{FileRecord, InfoHashRecord, MetadataRecord, NodeRecord, PeerCapabilities, PeerRecord, TrackerRecord};
use self::queries::{InfoHashQueryOptions, MetadataQueryOptions, NodeQueryOptions};
use crate::bittorrent::metadata::MetadataInfo;

/// Opens the database file at `db_path` and brings its schema up to date.
///
/// # Errors
///
/// Will return `Err` when the file cannot be opened or a migration fails.
pub fn connect(db_path: &str) -> Result<Box<dyn Database>, Error> {
    let database = sqlite::Sqlite::new(db_path)?;
    database.migrate()?;
    Ok(Box::new(database))
}

/// The persistence trait. It contains all the methods to interact with the
/// database.
#[async_trait]
pub trait Database: Sync + Send {
    /// It instantiates the database driver without touching the schema.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `db_path` is not usable as a database file.
    fn new(db_path: &str) -> Result<Self, Error>
    where
        Self: Sized;

    /// It applies pending schema migrations.
    ///
    /// # Context: Schema
    ///
    /// # Errors
    ///
    /// Will return `Err` if a migration fails.
    fn migrate(&self) -> Result<(), Error>;

    // Nodes

    /// Upserts a node observation and touches its `last_seen`.
    ///
    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn store_node(
        &self,
        node_id: &NodeId,
        endpoint: &Endpoint,
        is_responsive: bool,
        rtt_ms: Option<u32>,
    ) -> Result<(), Error>;

    /// Flips the responsiveness flag in place.
    ///
    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn update_node_responsiveness(&self, node_id: &NodeId, is_responsive: bool) -> Result<(), Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_node_ping_count(&self, node_id: &NodeId) -> Result<(), Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_node_query_count(&self, node_id: &NodeId) -> Result<(), Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_node_response_count(&self, node_id: &NodeId) -> Result<(), Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_node(&self, node_id: &NodeId) -> Result<Option<NodeRecord>, Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_nodes(&self, options: &NodeQueryOptions) -> Result<Vec<NodeRecord>, Error>;

    /// # Context: Nodes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn count_nodes(&self, options: &NodeQueryOptions) -> Result<u64, Error>;

    // Infohashes

    /// Inserts an infohash or touches its `last_seen`.
    ///
    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn store_infohash(&self, info_hash: &InfoHash) -> Result<(), Error>;

    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_infohash_announce_count(&self, info_hash: &InfoHash) -> Result<(), Error>;

    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_infohash_peer_count(&self, info_hash: &InfoHash) -> Result<(), Error>;

    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_infohash(&self, info_hash: &InfoHash) -> Result<Option<InfoHashRecord>, Error>;

    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_infohashes(&self, options: &InfoHashQueryOptions) -> Result<Vec<InfoHashRecord>, Error>;

    /// # Context: Infohashes
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn count_infohashes(&self, options: &InfoHashQueryOptions) -> Result<u64, Error>;

    // Metadata

    /// Writes the metadata record, its file rows and the `has_metadata` flag
    /// of the owning infohash in one atomic commit. Overwrites a previous
    /// download.
    ///
    /// # Context: Metadata
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn store_metadata(&self, info_hash: &InfoHash, metadata: &MetadataInfo) -> Result<(), Error>;

    /// # Context: Metadata
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_metadata(&self, info_hash: &InfoHash) -> Result<Option<MetadataRecord>, Error>;

    /// # Context: Metadata
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_metadata_list(&self, options: &MetadataQueryOptions) -> Result<Vec<MetadataRecord>, Error>;

    /// # Context: Metadata
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn count_metadata(&self, options: &MetadataQueryOptions) -> Result<u64, Error>;

    /// The file rows written together with the metadata record.
    ///
    /// # Context: Metadata
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_files(&self, info_hash: &InfoHash) -> Result<Vec<FileRecord>, Error>;

    // Peers

    /// Upserts a peer for a torrent. Capability flags are merged, a known
    /// peer id is never overwritten with an unknown one.
    ///
    /// # Context: Peers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn store_peer(
        &self,
        info_hash: &InfoHash,
        endpoint: &Endpoint,
        peer_id: Option<&NodeId>,
        capabilities: PeerCapabilities,
    ) -> Result<(), Error>;

    /// # Context: Peers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_peer_failure_count(&self, info_hash: &InfoHash, endpoint: &Endpoint) -> Result<(), Error>;

    /// # Context: Peers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_peer(&self, info_hash: &InfoHash, endpoint: &Endpoint) -> Result<Option<PeerRecord>, Error>;

    /// The peers known for a torrent, most recently seen first.
    ///
    /// # Context: Peers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_peers(&self, info_hash: &InfoHash, limit: u64) -> Result<Vec<PeerRecord>, Error>;

    /// # Context: Peers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn count_peers(&self) -> Result<u64, Error>;

    // Trackers

    /// Upserts a tracker URL for a torrent.
    ///
    /// # Context: Trackers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn store_tracker(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error>;

    /// # Context: Trackers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_tracker_announce_count(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error>;

    /// # Context: Trackers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to save.
    async fn increment_tracker_scrape_count(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error>;

    /// # Context: Trackers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn get_trackers(&self, info_hash: &InfoHash) -> Result<Vec<TrackerRecord>, Error>;

    /// # Context: Trackers
    ///
    /// # Errors
    ///
    /// Will return `Err` if unable to load.
    async fn count_trackers(&self) -> Result<u64, Error>;
}
