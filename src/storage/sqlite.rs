//! The `SQLite3` database driver.
//!
//! One database file on disk, WAL journaling, a single logical writer and
//! snapshot reads. Identifiers go in as 40-char lowercase hex, timestamps as
//! whole seconds.
use std::panic::Location;
use std::str::FromStr;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, params_from_iter, Row};
use r2d2_sqlite::SqliteConnectionManager;
use swarmscan_clock::clock::Time;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

use super::error::Error;
use super::migrations::MigrationManager;
use super::models::{FileRecord, InfoHashRecord, MetadataRecord, NodeRecord, PeerCapabilities, PeerRecord, TrackerRecord};
use super::queries::{InfoHashQueryOptions, MetadataQueryOptions, NodeQueryOptions};
use super::Database;
use crate::bittorrent::metadata::MetadataInfo;
use crate::CurrentClock;

const NODE_COLUMNS: &str =
    "node_id, ip, port, first_seen, last_seen, ping_count, query_count, response_count, is_responsive, last_rtt_ms";
const INFOHASH_COLUMNS: &str = "info_hash, first_seen, last_seen, announce_count, peer_count, has_metadata";
const METADATA_COLUMNS: &str =
    "info_hash, download_time, name, total_size, piece_count, file_count, comment, created_by, creation_date, raw_metadata";
const PEER_COLUMNS: &str = "info_hash, ip, port, peer_id, first_seen, last_seen, supports_dht, supports_extension_protocol, supports_fast_protocol, failure_count";

pub struct Sqlite {
    pool: Pool<SqliteConnectionManager>,
}

impl Sqlite {
    fn now_secs() -> u64 {
        CurrentClock::now().as_secs()
    }

    fn node_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<NodeRecord> {
        let node_id: String = row.get(0)?;
        let ip: String = row.get(1)?;
        let port: u16 = row.get(2)?;

        Ok(NodeRecord {
            node_id: NodeId::from_str(&node_id).expect("stored node ids are 40-char hex"),
            endpoint: Endpoint::new(ip.parse().expect("stored addresses are valid IPs"), port),
            first_seen: row.get(3)?,
            last_seen: row.get(4)?,
            ping_count: row.get(5)?,
            query_count: row.get(6)?,
            response_count: row.get(7)?,
            is_responsive: row.get(8)?,
            last_rtt_ms: row.get(9)?,
        })
    }

    fn infohash_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<InfoHashRecord> {
        let info_hash: String = row.get(0)?;

        Ok(InfoHashRecord {
            info_hash: InfoHash::from_str(&info_hash).expect("stored infohashes are 40-char hex"),
            first_seen: row.get(1)?,
            last_seen: row.get(2)?,
            announce_count: row.get(3)?,
            peer_count: row.get(4)?,
            has_metadata: row.get(5)?,
        })
    }

    fn metadata_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<MetadataRecord> {
        let info_hash: String = row.get(0)?;

        Ok(MetadataRecord {
            info_hash: InfoHash::from_str(&info_hash).expect("stored infohashes are 40-char hex"),
            download_time: row.get(1)?,
            name: row.get(2)?,
            total_size: row.get(3)?,
            piece_count: row.get(4)?,
            file_count: row.get(5)?,
            comment: row.get(6)?,
            created_by: row.get(7)?,
            creation_date: row.get(8)?,
            raw_metadata: row.get(9)?,
        })
    }

    fn peer_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<PeerRecord> {
        let info_hash: String = row.get(0)?;
        let ip: String = row.get(1)?;
        let port: u16 = row.get(2)?;
        let peer_id: Option<String> = row.get(3)?;

        Ok(PeerRecord {
            info_hash: InfoHash::from_str(&info_hash).expect("stored infohashes are 40-char hex"),
            endpoint: Endpoint::new(ip.parse().expect("stored addresses are valid IPs"), port),
            peer_id: peer_id.map(|id| NodeId::from_str(&id).expect("stored peer ids are 40-char hex")),
            first_seen: row.get(4)?,
            last_seen: row.get(5)?,
            capabilities: PeerCapabilities {
                supports_dht: row.get(6)?,
                supports_extension_protocol: row.get(7)?,
                supports_fast_protocol: row.get(8)?,
            },
            failure_count: row.get(9)?,
        })
    }

    fn tracker_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<TrackerRecord> {
        let info_hash: String = row.get(0)?;

        Ok(TrackerRecord {
            info_hash: InfoHash::from_str(&info_hash).expect("stored infohashes are 40-char hex"),
            url: row.get(1)?,
            first_seen: row.get(2)?,
            last_seen: row.get(3)?,
            announce_count: row.get(4)?,
            scrape_count: row.get(5)?,
        })
    }

    /// Makes sure the parent `infohashes` row exists before a dependent row
    /// is written. Runs inside the caller's connection.
    fn touch_infohash(conn: &r2d2_sqlite::rusqlite::Connection, info_hash: &InfoHash, now: u64) -> Result<(), Error> {
        conn.execute(
            "INSERT INTO infohashes (info_hash, first_seen, last_seen) VALUES (?1, ?2, ?2)
             ON CONFLICT(info_hash) DO UPDATE SET last_seen = excluded.last_seen",
            params![info_hash.to_string(), now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Database for Sqlite {
    /// It instantiates a new `SQLite3` database driver.
    ///
    /// Refer to [`Database::new`](crate::storage::Database::new).
    fn new(db_path: &str) -> Result<Sqlite, Error> {
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| Error::Io {
                        message: e.to_string(),
                        location: Location::caller(),
                    })?;
                }
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))
        });

        let pool = Pool::new(manager)?;

        Ok(Sqlite { pool })
    }

    /// Refer to [`Database::migrate`](crate::storage::Database::migrate).
    fn migrate(&self) -> Result<(), Error> {
        let manager = MigrationManager::new(self.pool.clone());
        manager.initialize()?;
        manager.migrate_up()
    }

    /// Refer to [`Database::store_node`](crate::storage::Database::store_node).
    async fn store_node(
        &self,
        node_id: &NodeId,
        endpoint: &Endpoint,
        is_responsive: bool,
        rtt_ms: Option<u32>,
    ) -> Result<(), Error> {
        let conn = self.pool.get()?;
        let now = Self::now_secs();

        conn.execute(
            "INSERT INTO nodes (node_id, ip, port, first_seen, last_seen, is_responsive, last_rtt_ms)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)
             ON CONFLICT(node_id) DO UPDATE SET
                 ip = excluded.ip,
                 port = excluded.port,
                 last_seen = excluded.last_seen,
                 is_responsive = excluded.is_responsive,
                 last_rtt_ms = COALESCE(excluded.last_rtt_ms, nodes.last_rtt_ms)",
            params![node_id.to_string(), endpoint.ip.to_string(), endpoint.port, now, is_responsive, rtt_ms],
        )?;

        Ok(())
    }

    /// Refer to [`Database::update_node_responsiveness`](crate::storage::Database::update_node_responsiveness).
    async fn update_node_responsiveness(&self, node_id: &NodeId, is_responsive: bool) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE nodes SET is_responsive = ?1 WHERE node_id = ?2",
            params![is_responsive, node_id.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::increment_node_ping_count`](crate::storage::Database::increment_node_ping_count).
    async fn increment_node_ping_count(&self, node_id: &NodeId) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE nodes SET ping_count = ping_count + 1 WHERE node_id = ?1",
            params![node_id.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::increment_node_query_count`](crate::storage::Database::increment_node_query_count).
    async fn increment_node_query_count(&self, node_id: &NodeId) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE nodes SET query_count = query_count + 1 WHERE node_id = ?1",
            params![node_id.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::increment_node_response_count`](crate::storage::Database::increment_node_response_count).
    async fn increment_node_response_count(&self, node_id: &NodeId) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE nodes SET response_count = response_count + 1 WHERE node_id = ?1",
            params![node_id.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::get_node`](crate::storage::Database::get_node).
    async fn get_node(&self, node_id: &NodeId) -> Result<Option<NodeRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?1"))?;
        let mut rows = stmt.query(params![node_id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::node_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`Database::get_nodes`](crate::storage::Database::get_nodes).
    async fn get_nodes(&self, options: &NodeQueryOptions) -> Result<Vec<NodeRecord>, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build();

        let mut stmt = conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes{}", tail.clause))?;
        let rows = stmt.query_map(params_from_iter(tail.params.iter()), |row| Self::node_from_row(row))?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }

        Ok(nodes)
    }

    /// Refer to [`Database::count_nodes`](crate::storage::Database::count_nodes).
    async fn count_nodes(&self, options: &NodeQueryOptions) -> Result<u64, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build_filters();

        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM nodes{}", tail.clause),
            params_from_iter(tail.params.iter()),
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Refer to [`Database::store_infohash`](crate::storage::Database::store_infohash).
    async fn store_infohash(&self, info_hash: &InfoHash) -> Result<(), Error> {
        let conn = self.pool.get()?;

        Self::touch_infohash(&conn, info_hash, Self::now_secs())
    }

    /// Refer to [`Database::increment_infohash_announce_count`](crate::storage::Database::increment_infohash_announce_count).
    async fn increment_infohash_announce_count(&self, info_hash: &InfoHash) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE infohashes SET announce_count = announce_count + 1 WHERE info_hash = ?1",
            params![info_hash.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::increment_infohash_peer_count`](crate::storage::Database::increment_infohash_peer_count).
    async fn increment_infohash_peer_count(&self, info_hash: &InfoHash) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE infohashes SET peer_count = peer_count + 1 WHERE info_hash = ?1",
            params![info_hash.to_string()],
        )?;

        Ok(())
    }

    /// Refer to [`Database::get_infohash`](crate::storage::Database::get_infohash).
    async fn get_infohash(&self, info_hash: &InfoHash) -> Result<Option<InfoHashRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!("SELECT {INFOHASH_COLUMNS} FROM infohashes WHERE info_hash = ?1"))?;
        let mut rows = stmt.query(params![info_hash.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::infohash_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`Database::get_infohashes`](crate::storage::Database::get_infohashes).
    async fn get_infohashes(&self, options: &InfoHashQueryOptions) -> Result<Vec<InfoHashRecord>, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build();

        let mut stmt = conn.prepare(&format!("SELECT {INFOHASH_COLUMNS} FROM infohashes{}", tail.clause))?;
        let rows = stmt.query_map(params_from_iter(tail.params.iter()), |row| Self::infohash_from_row(row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    /// Refer to [`Database::count_infohashes`](crate::storage::Database::count_infohashes).
    async fn count_infohashes(&self, options: &InfoHashQueryOptions) -> Result<u64, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build_filters();

        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM infohashes{}", tail.clause),
            params_from_iter(tail.params.iter()),
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Refer to [`Database::store_metadata`](crate::storage::Database::store_metadata).
    async fn store_metadata(&self, info_hash: &InfoHash, metadata: &MetadataInfo) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        let now = Self::now_secs();

        let tx = conn.transaction()?;

        Self::touch_infohash(&tx, info_hash, now)?;

        tx.execute(
            "INSERT OR REPLACE INTO metadata
                 (info_hash, download_time, name, total_size, piece_count, file_count, comment, created_by, creation_date, raw_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                info_hash.to_string(),
                now,
                metadata.name,
                metadata.total_size,
                metadata.piece_count,
                metadata.files.len() as u64,
                metadata.comment,
                metadata.created_by,
                metadata.creation_date,
                metadata.raw,
            ],
        )?;

        tx.execute("DELETE FROM files WHERE info_hash = ?1", params![info_hash.to_string()])?;

        for file in &metadata.files {
            tx.execute(
                "INSERT INTO files (info_hash, path, size) VALUES (?1, ?2, ?3)",
                params![info_hash.to_string(), file.path, file.size],
            )?;
        }

        tx.execute(
            "UPDATE infohashes SET has_metadata = 1 WHERE info_hash = ?1",
            params![info_hash.to_string()],
        )?;

        tx.commit()?;

        Ok(())
    }

    /// Refer to [`Database::get_metadata`](crate::storage::Database::get_metadata).
    async fn get_metadata(&self, info_hash: &InfoHash) -> Result<Option<MetadataRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!("SELECT {METADATA_COLUMNS} FROM metadata WHERE info_hash = ?1"))?;
        let mut rows = stmt.query(params![info_hash.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::metadata_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`Database::get_metadata_list`](crate::storage::Database::get_metadata_list).
    async fn get_metadata_list(&self, options: &MetadataQueryOptions) -> Result<Vec<MetadataRecord>, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build();

        let mut stmt = conn.prepare(&format!("SELECT {METADATA_COLUMNS} FROM metadata{}", tail.clause))?;
        let rows = stmt.query_map(params_from_iter(tail.params.iter()), |row| Self::metadata_from_row(row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    /// Refer to [`Database::count_metadata`](crate::storage::Database::count_metadata).
    async fn count_metadata(&self, options: &MetadataQueryOptions) -> Result<u64, Error> {
        let conn = self.pool.get()?;
        let tail = options.tail().build_filters();

        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM metadata{}", tail.clause),
            params_from_iter(tail.params.iter()),
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Refer to [`Database::get_files`](crate::storage::Database::get_files).
    async fn get_files(&self, info_hash: &InfoHash) -> Result<Vec<FileRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT info_hash, path, size FROM files WHERE info_hash = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![info_hash.to_string()], |row| {
            let info_hash: String = row.get(0)?;
            Ok(FileRecord {
                info_hash: InfoHash::from_str(&info_hash).expect("stored infohashes are 40-char hex"),
                path: row.get(1)?,
                size: row.get(2)?,
            })
        })?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }

        Ok(files)
    }

    /// Refer to [`Database::store_peer`](crate::storage::Database::store_peer).
    async fn store_peer(
        &self,
        info_hash: &InfoHash,
        endpoint: &Endpoint,
        peer_id: Option<&NodeId>,
        capabilities: PeerCapabilities,
    ) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        let now = Self::now_secs();

        let tx = conn.transaction()?;

        Self::touch_infohash(&tx, info_hash, now)?;

        tx.execute(
            "INSERT INTO peers
                 (info_hash, ip, port, peer_id, first_seen, last_seen, supports_dht, supports_extension_protocol, supports_fast_protocol)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8)
             ON CONFLICT(info_hash, ip, port) DO UPDATE SET
                 last_seen = excluded.last_seen,
                 peer_id = COALESCE(excluded.peer_id, peers.peer_id),
                 supports_dht = MAX(peers.supports_dht, excluded.supports_dht),
                 supports_extension_protocol = MAX(peers.supports_extension_protocol, excluded.supports_extension_protocol),
                 supports_fast_protocol = MAX(peers.supports_fast_protocol, excluded.supports_fast_protocol)",
            params![
                info_hash.to_string(),
                endpoint.ip.to_string(),
                endpoint.port,
                peer_id.map(NodeId::to_string),
                now,
                capabilities.supports_dht,
                capabilities.supports_extension_protocol,
                capabilities.supports_fast_protocol,
            ],
        )?;

        tx.commit()?;

        Ok(())
    }

    /// Refer to [`Database::increment_peer_failure_count`](crate::storage::Database::increment_peer_failure_count).
    async fn increment_peer_failure_count(&self, info_hash: &InfoHash, endpoint: &Endpoint) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE peers SET failure_count = failure_count + 1 WHERE info_hash = ?1 AND ip = ?2 AND port = ?3",
            params![info_hash.to_string(), endpoint.ip.to_string(), endpoint.port],
        )?;

        Ok(())
    }

    /// Refer to [`Database::get_peer`](crate::storage::Database::get_peer).
    async fn get_peer(&self, info_hash: &InfoHash, endpoint: &Endpoint) -> Result<Option<PeerRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE info_hash = ?1 AND ip = ?2 AND port = ?3"
        ))?;
        let mut rows = stmt.query(params![info_hash.to_string(), endpoint.ip.to_string(), endpoint.port])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::peer_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`Database::get_peers`](crate::storage::Database::get_peers).
    async fn get_peers(&self, info_hash: &InfoHash, limit: u64) -> Result<Vec<PeerRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE info_hash = ?1 ORDER BY last_seen DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![info_hash.to_string(), limit], |row| Self::peer_from_row(row))?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }

        Ok(peers)
    }

    /// Refer to [`Database::count_peers`](crate::storage::Database::count_peers).
    async fn count_peers(&self) -> Result<u64, Error> {
        let conn = self.pool.get()?;

        let count = conn.query_row("SELECT COUNT(*) FROM peers", [], |row| row.get(0))?;

        Ok(count)
    }

    /// Refer to [`Database::store_tracker`](crate::storage::Database::store_tracker).
    async fn store_tracker(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        let now = Self::now_secs();

        let tx = conn.transaction()?;

        Self::touch_infohash(&tx, info_hash, now)?;

        tx.execute(
            "INSERT INTO trackers (info_hash, url, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(info_hash, url) DO UPDATE SET last_seen = excluded.last_seen",
            params![info_hash.to_string(), url, now],
        )?;

        tx.commit()?;

        Ok(())
    }

    /// Refer to [`Database::increment_tracker_announce_count`](crate::storage::Database::increment_tracker_announce_count).
    async fn increment_tracker_announce_count(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE trackers SET announce_count = announce_count + 1 WHERE info_hash = ?1 AND url = ?2",
            params![info_hash.to_string(), url],
        )?;

        Ok(())
    }

    /// Refer to [`Database::increment_tracker_scrape_count`](crate::storage::Database::increment_tracker_scrape_count).
    async fn increment_tracker_scrape_count(&self, info_hash: &InfoHash, url: &str) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE trackers SET scrape_count = scrape_count + 1 WHERE info_hash = ?1 AND url = ?2",
            params![info_hash.to_string(), url],
        )?;

        Ok(())
    }

    /// Refer to [`Database::get_trackers`](crate::storage::Database::get_trackers).
    async fn get_trackers(&self, info_hash: &InfoHash) -> Result<Vec<TrackerRecord>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT info_hash, url, first_seen, last_seen, announce_count, scrape_count
             FROM trackers WHERE info_hash = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![info_hash.to_string()], |row| Self::tracker_from_row(row))?;

        let mut trackers = Vec::new();
        for row in rows {
            trackers.push(row?);
        }

        Ok(trackers)
    }

    /// Refer to [`Database::count_trackers`](crate::storage::Database::count_trackers).
    async fn count_trackers(&self) -> Result<u64, Error> {
        let conn = self.pool.get()?;

        let count = conn.query_row("SELECT COUNT(*) FROM trackers", [], |row| row.get(0))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use swarmscan_primitives::endpoint::Endpoint;
    use swarmscan_primitives::info_hash::InfoHash;
    use swarmscan_primitives::node_id::NodeId;
    use swarmscan_test_helpers::configuration::ephemeral;

    use crate::bittorrent::metadata::{MetadataFile, MetadataInfo};
    use crate::storage::models::PeerCapabilities;
    use crate::storage::queries::{NodeOrderBy, NodeQueryOptions};
    use crate::storage::{connect, Database};

    fn ephemeral_database() -> Box<dyn Database> {
        let config = ephemeral();
        connect(&config.database.path).expect("the test database should open")
    }

    fn test_metadata() -> MetadataInfo {
        MetadataInfo {
            name: "test".to_string(),
            piece_length: 16384,
            piece_count: 2,
            total_size: 32768,
            files: vec![MetadataFile {
                path: "test".to_string(),
                size: 32768,
            }],
            comment: None,
            created_by: Some("swarmscan tests".to_string()),
            creation_date: None,
            raw: b"d4:name4:teste".to_vec(),
        }
    }

    #[tokio::test]
    async fn it_should_store_and_load_a_node() {
        let database = ephemeral_database();
        let node_id = NodeId::random();
        let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();

        database.store_node(&node_id, &endpoint, true, Some(42)).await.unwrap();

        let record = database.get_node(&node_id).await.unwrap().unwrap();

        assert_eq!(record.node_id, node_id);
        assert_eq!(record.endpoint, endpoint);
        assert!(record.is_responsive);
        assert_eq!(record.last_rtt_ms, Some(42));
    }

    #[tokio::test]
    async fn storing_a_node_twice_should_upsert_not_duplicate() {
        let database = ephemeral_database();
        let node_id = NodeId::random();
        let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();

        database.store_node(&node_id, &endpoint, true, None).await.unwrap();
        database.store_node(&node_id, &endpoint, false, None).await.unwrap();

        let count = database.count_nodes(&NodeQueryOptions::default()).await.unwrap();
        let record = database.get_node(&node_id).await.unwrap().unwrap();

        assert_eq!(count, 1);
        assert!(!record.is_responsive);
    }

    #[tokio::test]
    async fn an_upsert_should_not_clear_the_last_known_rtt() {
        let database = ephemeral_database();
        let node_id = NodeId::random();
        let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();

        database.store_node(&node_id, &endpoint, true, Some(42)).await.unwrap();
        database.store_node(&node_id, &endpoint, true, None).await.unwrap();

        let record = database.get_node(&node_id).await.unwrap().unwrap();

        assert_eq!(record.last_rtt_ms, Some(42));
    }

    #[tokio::test]
    async fn it_should_increment_the_node_counters() {
        let database = ephemeral_database();
        let node_id = NodeId::random();
        let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();

        database.store_node(&node_id, &endpoint, true, None).await.unwrap();
        database.increment_node_ping_count(&node_id).await.unwrap();
        database.increment_node_query_count(&node_id).await.unwrap();
        database.increment_node_response_count(&node_id).await.unwrap();
        database.increment_node_response_count(&node_id).await.unwrap();

        let record = database.get_node(&node_id).await.unwrap().unwrap();

        assert_eq!(record.ping_count, 1);
        assert_eq!(record.query_count, 1);
        assert_eq!(record.response_count, 2);
    }

    #[tokio::test]
    async fn it_should_page_and_order_node_listings() {
        let database = ephemeral_database();

        for _ in 0..100 {
            let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();
            database.store_node(&NodeId::random(), &endpoint, true, None).await.unwrap();
        }

        let options = NodeQueryOptions {
            limit: Some(10),
            order_by: Some(NodeOrderBy::LastSeen),
            order_desc: true,
            ..Default::default()
        };

        let nodes = database.get_nodes(&options).await.unwrap();
        let count = database.count_nodes(&NodeQueryOptions::default()).await.unwrap();

        assert_eq!(nodes.len(), 10);
        assert_eq!(count, 100);
        assert!(nodes.windows(2).all(|pair| pair[0].last_seen >= pair[1].last_seen));
    }

    #[tokio::test]
    async fn it_should_store_and_load_an_infohash() {
        let database = ephemeral_database();
        let info_hash = InfoHash::random();

        database.store_infohash(&info_hash).await.unwrap();
        database.increment_infohash_announce_count(&info_hash).await.unwrap();

        let record = database.get_infohash(&info_hash).await.unwrap().unwrap();

        assert_eq!(record.info_hash, info_hash);
        assert_eq!(record.announce_count, 1);
        assert!(!record.has_metadata);
    }

    #[tokio::test]
    async fn storing_metadata_should_write_files_and_flip_has_metadata_atomically() {
        let database = ephemeral_database();
        let info_hash = InfoHash::random();

        database.store_metadata(&info_hash, &test_metadata()).await.unwrap();

        let record = database.get_metadata(&info_hash).await.unwrap().unwrap();
        let files = database.get_files(&info_hash).await.unwrap();
        let infohash_record = database.get_infohash(&info_hash).await.unwrap().unwrap();

        assert_eq!(record.name, "test");
        assert_eq!(record.total_size, 32768);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 32768);
        assert!(infohash_record.has_metadata);
    }

    #[tokio::test]
    async fn stored_records_should_survive_a_close_and_reopen_cycle() {
        let config = ephemeral();
        let info_hash = InfoHash::random();

        {
            let database = connect(&config.database.path).unwrap();
            database.store_metadata(&info_hash, &test_metadata()).await.unwrap();
        }

        let database = connect(&config.database.path).unwrap();
        let record = database.get_metadata(&info_hash).await.unwrap().unwrap();

        assert_eq!(record.name, "test");
        assert_eq!(record.raw_metadata, b"d4:name4:teste".to_vec());
    }

    #[tokio::test]
    async fn it_should_store_a_peer_and_merge_its_capabilities() {
        let database = ephemeral_database();
        let info_hash = InfoHash::random();
        let endpoint: Endpoint = "192.0.2.1:5000".parse().unwrap();

        let dht_only = PeerCapabilities {
            supports_dht: true,
            ..Default::default()
        };
        let extension_only = PeerCapabilities {
            supports_extension_protocol: true,
            ..Default::default()
        };

        database.store_peer(&info_hash, &endpoint, None, dht_only).await.unwrap();
        database
            .store_peer(&info_hash, &endpoint, None, extension_only)
            .await
            .unwrap();

        let record = database.get_peer(&info_hash, &endpoint).await.unwrap().unwrap();

        assert!(record.capabilities.supports_dht);
        assert!(record.capabilities.supports_extension_protocol);
        assert_eq!(database.count_peers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn it_should_count_peer_download_failures() {
        let database = ephemeral_database();
        let info_hash = InfoHash::random();
        let endpoint: Endpoint = "192.0.2.1:5000".parse().unwrap();

        database
            .store_peer(&info_hash, &endpoint, None, PeerCapabilities::default())
            .await
            .unwrap();
        database.increment_peer_failure_count(&info_hash, &endpoint).await.unwrap();

        let record = database.get_peer(&info_hash, &endpoint).await.unwrap().unwrap();

        assert_eq!(record.failure_count, 1);
    }

    #[tokio::test]
    async fn it_should_store_trackers_uniquely_per_infohash_and_url() {
        let database = ephemeral_database();
        let info_hash = InfoHash::random();

        database.store_tracker(&info_hash, "udp://tracker.example.com:80").await.unwrap();
        database.store_tracker(&info_hash, "udp://tracker.example.com:80").await.unwrap();
        database
            .increment_tracker_announce_count(&info_hash, "udp://tracker.example.com:80")
            .await
            .unwrap();

        let trackers = database.get_trackers(&info_hash).await.unwrap();

        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].announce_count, 1);
        assert_eq!(database.count_trackers().await.unwrap(), 1);
    }
}
