//! Schema migrations.
//!
//! Migrations declare forward and reverse SQL and are applied strictly in
//! ascending version order, each inside its own transaction. Applied versions
//! are recorded in the `migrations` table as
//! `(version, description, applied_at)`, so the current schema version is
//! always `MAX(version)`.
use r2d2::Pool;
use r2d2_sqlite::rusqlite::params;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use super::error::Error;
use crate::CurrentClock;
use swarmscan_clock::clock::Time;

const STORAGE_LOG_TARGET: &str = "storage";

/// A single schema version step.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

/// A `migrations` bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: u64,
}

/// Applies and rolls back schema migrations over a connection pool.
pub struct MigrationManager {
    pool: Pool<SqliteConnectionManager>,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    #[must_use]
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self {
            pool,
            migrations: initial_migrations(),
        }
    }

    /// Creates the bookkeeping table.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the table cannot be created.
    pub fn initialize(&self) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// The highest applied version, or 0 for a fresh database.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the bookkeeping table cannot be read.
    pub fn current_version(&self) -> Result<u32, Error> {
        let conn = self.pool.get()?;

        let version: Option<u32> = conn.query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))?;

        Ok(version.unwrap_or(0))
    }

    /// The highest version this build knows about.
    #[must_use]
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Applies every migration newer than the current version.
    ///
    /// # Errors
    ///
    /// Will return `Err` when a migration fails; the failing migration is
    /// rolled back and the version stays where it was.
    pub fn migrate_up(&self) -> Result<(), Error> {
        self.migrate_to(self.latest_version())
    }

    /// Migrates forward to `target_version`, or rolls back to it when it is
    /// below the current version.
    ///
    /// # Errors
    ///
    /// Will return `Err` when a migration step fails.
    pub fn migrate_to(&self, target_version: u32) -> Result<(), Error> {
        let current = self.current_version()?;

        if current > target_version {
            return self.rollback_to(target_version);
        }

        for migration in &self.migrations {
            if migration.version <= current || migration.version > target_version {
                continue;
            }

            info!(target: STORAGE_LOG_TARGET, version = migration.version, description = migration.description, "applying migration");

            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            for statement in migration.up {
                tx.execute_batch(statement)?;
            }

            tx.execute(
                "INSERT INTO migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.description, CurrentClock::now().as_secs()],
            )?;

            tx.commit()?;
        }

        Ok(())
    }

    /// Reverses migrations down to (and not including) `target_version`.
    ///
    /// # Errors
    ///
    /// Will return `Err` when a rollback step fails.
    pub fn rollback_to(&self, target_version: u32) -> Result<(), Error> {
        let current = self.current_version()?;

        for migration in self.migrations.iter().rev() {
            if migration.version > current || migration.version <= target_version {
                continue;
            }

            info!(target: STORAGE_LOG_TARGET, version = migration.version, description = migration.description, "rolling back migration");

            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            for statement in migration.down {
                tx.execute_batch(statement)?;
            }

            tx.execute("DELETE FROM migrations WHERE version = ?1", params![migration.version])?;

            tx.commit()?;
        }

        Ok(())
    }

    /// The applied migrations in ascending version order.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the bookkeeping table cannot be read.
    pub fn history(&self) -> Result<Vec<AppliedMigration>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT version, description, applied_at FROM migrations ORDER BY version ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                description: row.get(1)?,
                applied_at: row.get(2)?,
            })
        })?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }

        Ok(history)
    }
}

/// Schema version 1: the full crawler schema.
///
/// Identifiers are TEXT in their 40-char lowercase hex form. Foreign keys
/// cascade so that wiping an infohash wipes its dependent rows.
fn initial_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "create initial schema",
        up: &[
            "CREATE TABLE nodes (
                node_id TEXT PRIMARY KEY,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                ping_count INTEGER NOT NULL DEFAULT 0,
                query_count INTEGER NOT NULL DEFAULT 0,
                response_count INTEGER NOT NULL DEFAULT 0,
                is_responsive INTEGER NOT NULL DEFAULT 0,
                last_rtt_ms INTEGER
            );",
            "CREATE TABLE infohashes (
                info_hash TEXT PRIMARY KEY,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                announce_count INTEGER NOT NULL DEFAULT 0,
                peer_count INTEGER NOT NULL DEFAULT 0,
                has_metadata INTEGER NOT NULL DEFAULT 0
            );",
            "CREATE TABLE metadata (
                info_hash TEXT PRIMARY KEY,
                download_time INTEGER NOT NULL,
                name TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                piece_count INTEGER NOT NULL,
                file_count INTEGER NOT NULL,
                comment TEXT,
                created_by TEXT,
                creation_date INTEGER,
                raw_metadata BLOB NOT NULL,
                FOREIGN KEY (info_hash) REFERENCES infohashes (info_hash) ON DELETE CASCADE
            );",
            "CREATE TABLE files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                info_hash TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                FOREIGN KEY (info_hash) REFERENCES infohashes (info_hash) ON DELETE CASCADE
            );",
            "CREATE TABLE trackers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                info_hash TEXT NOT NULL,
                url TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                announce_count INTEGER NOT NULL DEFAULT 0,
                scrape_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (info_hash) REFERENCES infohashes (info_hash) ON DELETE CASCADE,
                UNIQUE (info_hash, url)
            );",
            "CREATE TABLE peers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                info_hash TEXT NOT NULL,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                peer_id TEXT,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                supports_dht INTEGER NOT NULL DEFAULT 0,
                supports_extension_protocol INTEGER NOT NULL DEFAULT 0,
                supports_fast_protocol INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (info_hash) REFERENCES infohashes (info_hash) ON DELETE CASCADE,
                UNIQUE (info_hash, ip, port)
            );",
            "CREATE INDEX idx_nodes_last_seen ON nodes (last_seen);",
            "CREATE INDEX idx_nodes_is_responsive ON nodes (is_responsive);",
            "CREATE INDEX idx_infohashes_last_seen ON infohashes (last_seen);",
            "CREATE INDEX idx_infohashes_has_metadata ON infohashes (has_metadata);",
            "CREATE INDEX idx_metadata_name ON metadata (name);",
            "CREATE INDEX idx_metadata_download_time ON metadata (download_time);",
            "CREATE INDEX idx_files_info_hash ON files (info_hash);",
            "CREATE INDEX idx_trackers_info_hash ON trackers (info_hash);",
            "CREATE INDEX idx_peers_info_hash ON peers (info_hash);",
            "CREATE INDEX idx_peers_last_seen ON peers (last_seen);",
        ],
        down: &[
            "DROP TABLE peers;",
            "DROP TABLE trackers;",
            "DROP TABLE files;",
            "DROP TABLE metadata;",
            "DROP TABLE infohashes;",
            "DROP TABLE nodes;",
        ],
    }]
}
