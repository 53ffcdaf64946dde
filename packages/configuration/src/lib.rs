//! Configuration data structures for the swarmscan crawler.
//!
//! The configuration is loaded from a [TOML](https://toml.io/en/) file. Each
//! section in the TOML structure is mapped to a data structure: `[database]`
//! maps to [`Database`], `[dht]` to [`Dht`], and so on. Every key has a
//! default, so a missing file or a partial file always produces a complete
//! configuration.
//!
//! The settings are immutable after start, with two exceptions: the web
//! front-end keys `web.auto_start` and `web.port` may be updated at runtime
//! and written back with [`Configuration::save_to_file`].
//!
//! The default configuration is:
//!
//! ```toml
//! [database]
//! path = "~/.config/swarmscan/data.db"   # resolved against the home directory
//!
//! [dht]
//! port = 6881
//! max_nodes = 1000
//! ping_interval = 300
//! bootstrap_nodes = [
//!     "router.bittorrent.com:6881",
//!     "router.utorrent.com:6881",
//!     "dht.transmissionbt.com:6881",
//! ]
//!
//! [bittorrent]
//! max_connections = 50
//! connection_timeout = 10
//! download_timeout = 30
//!
//! [tracker]
//! announce_interval = 1800
//!
//! [log]
//! level = "debug"
//!
//! [crawler]
//! random_discovery = true
//!
//! [web]
//! auto_start = false
//! port = 8080
//! ```
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use config::{Config, ConfigError, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the whole configuration in TOML format.
pub const ENV_VAR_CONFIG: &str = "SWARMSCAN_CONFIG";

/// Environment variable holding the path to the configuration file.
pub const ENV_VAR_CONFIG_PATH: &str = "SWARMSCAN_CONFIG_PATH";

/// Configuration for the persistent store.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Database {
    /// Location of the `SQLite` database file.
    pub path: String,
}

/// Configuration for the DHT engine.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Dht {
    /// The UDP port the DHT engine listens on.
    pub port: u16,
    /// Fixed local node id as a 40-char hex string. A random id is generated
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Soft cap on the number of nodes kept in the routing table.
    pub max_nodes: u32,
    /// Interval in seconds between probes of questionable nodes.
    pub ping_interval: u64,
    /// `host:port` list used to join the network on start.
    pub bootstrap_nodes: Vec<String>,
}

impl Dht {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }
}

/// Configuration for the `BitTorrent` metadata fetcher.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Bittorrent {
    /// Maximum number of concurrent metadata download sessions.
    pub max_connections: u32,
    /// TCP connect plus handshake deadline, in seconds.
    pub connection_timeout: u64,
    /// Whole-session deadline, in seconds.
    pub download_timeout: u64,
}

impl Bittorrent {
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }
}

/// Configuration for tracker bookkeeping.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Tracker {
    /// Tracker refresh interval, in seconds.
    pub announce_interval: u64,
}

/// Logging configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Log {
    /// Logging level. Possible values are: `off`, `error`, `warn`, `info`,
    /// `debug` and `trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Configuration for the crawling behaviour.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Crawler {
    /// Whether the engine probes random 160-bit targets to surface
    /// infohashes.
    pub random_discovery: bool,
}

/// Configuration for the web front-end. These are the only keys that may be
/// updated after start.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct Web {
    pub auto_start: bool,
    pub port: u16,
}

/// Core configuration for the crawler.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Configuration {
    pub database: Database,
    pub dht: Dht,
    pub bittorrent: Bittorrent,
    pub tracker: Tracker,
    pub log: Log,
    pub crawler: Crawler,
    pub web: Web,
}

/// Errors that can occur when loading the configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to read the configuration file: {source}")]
    UnableToLoadFromConfigFile { source: std::io::Error },

    #[error("unable to write the configuration file: {source}")]
    UnableToSaveToConfigFile { source: std::io::Error },

    #[error("failed processing the configuration: {source}")]
    ConfigError { source: ConfigError },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError { source: err }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database: Database {
                path: default_database_path(),
            },
            dht: Dht {
                port: 6881,
                node_id: None,
                max_nodes: 1000,
                ping_interval: 300,
                bootstrap_nodes: vec![
                    String::from("router.bittorrent.com:6881"),
                    String::from("router.utorrent.com:6881"),
                    String::from("dht.transmissionbt.com:6881"),
                ],
            },
            bittorrent: Bittorrent {
                max_connections: 50,
                connection_timeout: 10,
                download_timeout: 30,
            },
            tracker: Tracker { announce_interval: 1800 },
            log: Log {
                level: Some(String::from("debug")),
            },
            crawler: Crawler { random_discovery: true },
            web: Web {
                auto_start: false,
                port: 8080,
            },
        }
    }
}

fn default_database_path() -> String {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("swarmscan");
    path.push("data.db");
    path.to_string_lossy().into_owned()
}

/// The configuration file location used when none is given on the command
/// line or in the environment.
#[must_use]
pub fn default_config_path() -> String {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("swarmscan");
    path.push("swarmscan.toml");
    path.to_string_lossy().into_owned()
}

impl Configuration {
    /// Loads the configuration, preferring the `SWARMSCAN_CONFIG` environment
    /// variable (TOML content), then the file at `path`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if neither source produces a valid configuration.
    pub fn load(path: &str) -> Result<Configuration, Error> {
        if let Ok(toml) = env::var(ENV_VAR_CONFIG) {
            return Self::load_from_str(&toml);
        }
        Self::load_from_file(path)
    }

    /// Loads the configuration from the configuration file. Missing keys take
    /// their default values.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `path` does not exist or has a bad configuration.
    pub fn load_from_file(path: &str) -> Result<Configuration, Error> {
        let toml = fs::read_to_string(path).map_err(|e| Error::UnableToLoadFromConfigFile { source: e })?;
        Self::load_from_str(&toml)
    }

    fn load_from_str(toml: &str) -> Result<Configuration, Error> {
        let defaults = toml::to_string(&Configuration::default()).expect("the default configuration should serialize");

        let config = Config::builder()
            .add_source(File::from_str(&defaults, FileFormat::Toml))
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Saves the configuration to the configuration file, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file cannot be written.
    pub fn save_to_file(&self, path: &str) -> Result<(), Error> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(|e| Error::UnableToSaveToConfigFile { source: e })?;
        }
        fs::write(path, self.to_toml()).map_err(|e| Error::UnableToSaveToConfigFile { source: e })?;
        Ok(())
    }

    /// Saves the default configuration at the given path.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `path` is not a valid path or the configuration
    /// file cannot be created.
    pub fn create_default_configuration_file(path: &str) -> Result<Configuration, Error> {
        let config = Configuration::default();
        config.save_to_file(path)?;
        Ok(config)
    }

    /// Encodes the configuration to TOML.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string(self).expect("the configuration should be TOML encodable")
    }
}

#[cfg(test)]
mod tests {
    use crate::Configuration;

    fn create_temp_config_file_with(contents: &str) -> String {
        use std::io::Write;

        use uuid::Uuid;

        let temp_file = std::env::temp_dir().join(format!("test_config_{}.toml", Uuid::new_v4()));
        let path = temp_file.to_string_lossy().to_string();

        let mut file = std::fs::File::create(temp_file).unwrap();
        writeln!(&mut file, "{contents}").unwrap();

        path
    }

    #[test]
    fn configuration_should_have_default_values() {
        let configuration = Configuration::default();

        assert_eq!(configuration.dht.port, 6881);
        assert_eq!(configuration.dht.max_nodes, 1000);
        assert_eq!(configuration.dht.bootstrap_nodes.len(), 3);
        assert_eq!(configuration.bittorrent.max_connections, 50);
        assert_eq!(configuration.tracker.announce_interval, 1800);
        assert_eq!(configuration.log.level, Some("debug".to_string()));
        assert!(configuration.crawler.random_discovery);
    }

    #[test]
    fn configuration_should_round_trip_through_a_toml_config_file() {
        let configuration = Configuration::default();
        let path = create_temp_config_file_with(&configuration.to_toml());

        let loaded = Configuration::load_from_file(&path).expect("the configuration file should load");

        assert_eq!(loaded, configuration);
    }

    #[test]
    fn a_partial_configuration_file_should_take_defaults_for_missing_keys() {
        let path = create_temp_config_file_with("[dht]\nport = 7000\n");

        let loaded = Configuration::load_from_file(&path).expect("the configuration file should load");

        assert_eq!(loaded.dht.port, 7000);
        assert_eq!(loaded.bittorrent.max_connections, 50);
    }

    #[test]
    fn loading_a_missing_configuration_file_should_fail() {
        assert!(Configuration::load_from_file("/nonexistent/swarmscan.toml").is_err());
    }

    #[test]
    fn timeouts_should_be_exposed_as_durations() {
        let configuration = Configuration::default();

        assert_eq!(configuration.bittorrent.connection_timeout().as_secs(), 10);
        assert_eq!(configuration.bittorrent.download_timeout().as_secs(), 30);
        assert_eq!(configuration.dht.ping_interval().as_secs(), 300);
    }
}
