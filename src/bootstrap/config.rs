//! Resolution of the effective configuration.
//!
//! Sources, strongest first: command line overrides, the `SWARMSCAN_CONFIG`
//! environment variable, the configuration file. A missing file is created
//! with the defaults, so a first run works without any setup.
use swarmscan_configuration::{default_config_path, Configuration, Error, ENV_VAR_CONFIG_PATH};

/// Command line overrides applied on top of the loaded configuration.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Overrides `database.path`.
    pub database_path: Option<String>,
    /// Overrides `dht.port`.
    pub dht_port: Option<u16>,
}

/// Loads (or creates) the configuration and applies the overrides. Returns
/// the configuration together with the path it came from, which is also
/// where runtime-mutable keys get persisted.
///
/// # Errors
///
/// Will return `Err` when the configuration cannot be loaded or the default
/// file cannot be created.
pub fn initialize_configuration(config_path: Option<&str>, overrides: &Overrides) -> Result<(Configuration, String), Error> {
    let path = config_path
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_VAR_CONFIG_PATH).ok())
        .unwrap_or_else(default_config_path);

    if !std::path::Path::new(&path).exists() {
        Configuration::create_default_configuration_file(&path)?;
    }

    let mut config = Configuration::load(&path)?;

    if let Some(database_path) = &overrides.database_path {
        config.database.path.clone_from(database_path);
    }
    if let Some(port) = overrides.dht_port {
        config.dht.port = port;
    }

    Ok((config, path))
}
