//! **Swarmscan** is a `BitTorrent` Mainline DHT crawler.
//!
//! [`BitTorrent`](https://en.wikipedia.org/wiki/BitTorrent) peers find each
//! other through a [Kademlia](https://en.wikipedia.org/wiki/Kademlia)-based
//! distributed hash table (the Mainline DHT, [BEP-5](https://www.bittorrent.org/beps/bep_0005.html)).
//! Swarmscan joins that network as an ordinary node and harvests what flows
//! past it: node addresses, the infohashes other peers look up and announce,
//! and the peers behind them. For every torrent it learns about it opens
//! peer connections and downloads the torrent's metadata over the
//! ut_metadata extension ([BEP-9](https://www.bittorrent.org/beps/bep_0009.html) /
//! [BEP-10](https://www.bittorrent.org/beps/bep_0010.html)) — no `.torrent`
//! file needed. Everything ends up in an indexed `SQLite` database for later
//! query.
//!
//! # Components
//!
//! - [`dht`]: the Kademlia engine — routing table, KRPC codec, transaction
//!   and token management, bootstrap, iterative lookups and the discovery
//!   loops.
//! - [`bittorrent`]: the peer engine — handshake, extension protocol and the
//!   metadata download sessions.
//! - [`storage`]: the migration-managed, transactional record of nodes,
//!   infohashes, peers, trackers, metadata and files.
//! - [`core`]: the controller composing the above, the domain event bus and
//!   the statistics keeper.
//! - [`console`]: the interactive command console over the storage read
//!   surface.
//!
//! # Usage
//!
//! ```text
//! swarmscan --crawl              # join the DHT and harvest
//! swarmscan --interactive        # inspect the database, start/stop crawling
//! swarmscan -c my-config.toml -d my-data.db --crawl
//! ```
pub mod app;
pub mod bittorrent;
pub mod bootstrap;
pub mod console;
pub mod core;
pub mod dht;
pub mod signals;
pub mod storage;

/// This code needs to be copied into each crate.
/// Working version, for production.
#[cfg(not(test))]
pub(crate) type CurrentClock = swarmscan_clock::clock::Working;

/// Stopped version, for testing.
#[cfg(test)]
pub(crate) type CurrentClock = swarmscan_clock::clock::Stopped;
