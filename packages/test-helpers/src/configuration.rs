//! Ephemeral configurations for tests.
use swarmscan_configuration::Configuration;
use uuid::Uuid;

/// A configuration that binds to ephemeral ports and writes to a fresh
/// database file under the system temp dir. Each call produces an
/// independent instance, so tests can run in parallel.
#[must_use]
pub fn ephemeral() -> Configuration {
    let mut config = Configuration::default();

    // OS-assigned port, so concurrent test engines never collide
    config.dht.port = 0;

    let db_file = std::env::temp_dir().join(format!("swarmscan_test_{}.db", Uuid::new_v4()));
    config.database.path = db_file.to_string_lossy().into_owned();

    // never reach the public routers from a test run
    config.dht.bootstrap_nodes = Vec::new();
    config.crawler.random_discovery = false;

    config
}
