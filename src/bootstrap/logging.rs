//! Setup for the application logging.
//!
//! It redirects the tracing output to stdout with the level defined in the
//! `log.level` configuration key (case is ignored):
//!
//! - `off` (i.e. don't load any subscriber)
//! - `error`
//! - `warn`
//! - `info`
//! - `debug`
//! - `trace`
use std::sync::Once;

use swarmscan_configuration::Configuration;
use tracing::debug;
use tracing::level_filters::LevelFilter;

static INIT: Once = Once::new();

/// It redirects the tracing output to stdout with the configured level.
///
/// # Panics
///
/// Will panic when the configured level is not one of the known names.
pub fn setup(cfg: &Configuration) {
    let filter = level_filter(cfg.log.level.as_deref());

    if filter == LevelFilter::OFF {
        return;
    }

    INIT.call_once(|| {
        stdout_init(filter);
    });
}

fn level_filter(level: Option<&str>) -> LevelFilter {
    let level = level.unwrap_or("info");

    level.parse().unwrap_or_else(|_| {
        panic!("unrecognized log.level {level:?}; use off, error, warn, info, debug or trace")
    })
}

fn stdout_init(filter: LevelFilter) {
    tracing_subscriber::fmt().with_max_level(filter).init();

    debug!("logging initialized");
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::level_filter;

    #[test]
    fn the_level_should_default_to_info() {
        assert_eq!(level_filter(None), LevelFilter::INFO);
    }

    #[test]
    fn known_level_names_should_parse_case_insensitively() {
        assert_eq!(level_filter(Some("DEBUG")), LevelFilter::DEBUG);
        assert_eq!(level_filter(Some("off")), LevelFilter::OFF);
    }

    #[test]
    #[should_panic = "unrecognized log.level"]
    fn an_unknown_level_name_should_panic() {
        let _ = level_filter(Some("loud"));
    }
}
