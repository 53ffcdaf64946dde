//! The crawler application.
//!
//! Parses the command line, resolves the configuration, builds the
//! [`Crawler`](crate::core::Crawler) and drives its lifecycle:
//!
//! - `--crawl` starts crawling immediately and runs until a shutdown
//!   signal or a fatal engine error.
//! - `--interactive` hands control to the command console.
//! - with neither flag the engines run passively (answering DHT queries and
//!   recording what they see) until a shutdown signal arrives.
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::bootstrap;
use crate::console;
use crate::core::Crawler;

/// A BitTorrent Mainline DHT crawler that harvests nodes, infohashes, peers
/// and torrent metadata.
#[derive(Parser, Debug)]
#[command(name = "swarmscan", version, about)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Path to the database file, overriding the configuration.
    #[arg(short = 'd', long = "database")]
    pub database: Option<String>,

    /// Start crawling immediately.
    #[arg(short = 'C', long = "crawl")]
    pub crawl: bool,

    /// Run the interactive console.
    #[arg(short = 'i', long = "interactive")]
    pub interactive: bool,

    /// UDP port for the DHT engine, overriding the configuration.
    #[arg(long = "port")]
    pub port: Option<u16>,
}

/// Runs the application until it finishes or is told to stop.
///
/// # Errors
///
/// Will return `Err` on configuration or initialization failures; the
/// binary maps that to exit code 1.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let overrides = bootstrap::config::Overrides {
        database_path: args.database.clone(),
        dht_port: args.port,
    };

    let (config, config_path) = bootstrap::config::initialize_configuration(args.config.as_deref(), &overrides)?;

    bootstrap::logging::setup(&config);

    let crawler = Arc::new(Crawler::new(config, Some(config_path)));

    crawler.initialize().await?;
    crawler.start().await?;

    if args.crawl {
        crawler.start_crawling().await?;
    }

    if args.interactive {
        console::run(crawler.clone()).await?;
    } else {
        let fatal = crawler.fatal_signal();
        tokio::select! {
            () = crate::signals::global_shutdown_signal() => {
                info!("shutdown signal received");
            }
            () = fatal.notified() => {
                info!("stopping after a fatal engine error");
            }
        }
    }

    crawler.stop().await;

    Ok(())
}
