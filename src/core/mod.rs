//! The core `crawler` module contains the controller that composes the
//! engines, independent of any delivery layer.
//!
//! The [`Crawler`] owns the storage engine, the domain event bus and the
//! statistics keeper, and supervises the DHT engine and the metadata
//! fetcher:
//!
//! ```text
//! DHT engine ──┐                          ┌── store_node / store_infohash
//!              ├─> event bus ─> handlers ─┤    store_peer / store_metadata
//! fetcher   ───┘                          └── statistics
//! ```
//!
//! Its lifecycle is `CREATED → INITIALIZED → RUNNING ↔ CRAWLING → STOPPED`:
//!
//! - `initialize` opens the database, runs migrations and wires the
//!   persistence handlers.
//! - `start` launches the DHT engine and the metadata fetcher.
//! - `start_crawling` additionally feeds every discovered peer to the
//!   fetcher.
//! - `stop` tears the engines down in reverse construction order, waiting
//!   up to five seconds for each. It is terminal and safe to call from a
//!   signal handler path.
//!
//! All verbs are idempotent. Event handlers perform one storage write each
//! and never block on network I/O; a handler error is logged and counted,
//! never propagated.
pub mod error;
pub mod events;
pub mod statistics;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use swarmscan_configuration::{Configuration, Web};
use tokio::sync::oneshot;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use self::error::Error;
use self::events::{Event, EventKind, SubscriptionId};
use crate::bittorrent::MetadataFetcher;
use crate::dht::DhtEngine;
use crate::signals::Halted;
use crate::storage::models::PeerCapabilities;
use crate::storage::queries::{InfoHashQueryOptions, MetadataQueryOptions, NodeQueryOptions};
use crate::storage::Database;

pub const CONTROLLER_LOG_TARGET: &str = "controller";

/// How long `stop` waits for each engine to wind down.
const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Initialized,
    Running,
    Crawling,
    Stopped,
}

struct Job {
    name: &'static str,
    tx_halt: oneshot::Sender<Halted>,
    handle: JoinHandle<()>,
}

struct Runtime {
    database: Arc<Box<dyn Database>>,
    dispatcher: events::Dispatcher,
    event_sender: Arc<dyn events::EventSender>,
    stats_repo: statistics::Repo,
    dht: Option<Arc<DhtEngine>>,
    fetcher: Option<Arc<MetadataFetcher>>,
    jobs: Vec<Job>,
    crawl_subscription: Option<SubscriptionId>,
}

struct Inner {
    state: State,
    runtime: Option<Runtime>,
}

/// The lifecycle supervisor composing the engines.
pub struct Crawler {
    config: Configuration,
    config_path: Option<String>,
    web_settings: RwLock<Web>,
    fatal: Arc<Notify>,
    inner: RwLock<Inner>,
}

impl Crawler {
    #[must_use]
    pub fn new(config: Configuration, config_path: Option<String>) -> Self {
        let web_settings = RwLock::new(config.web);

        Self {
            config,
            config_path,
            web_settings,
            fatal: Arc::new(Notify::new()),
            inner: RwLock::new(Inner {
                state: State::Created,
                runtime: None,
            }),
        }
    }

    pub async fn state(&self) -> State {
        self.inner.read().await.state
    }

    /// The storage read surface, available once initialized.
    pub async fn database(&self) -> Option<Arc<Box<dyn Database>>> {
        self.inner.read().await.runtime.as_ref().map(|runtime| runtime.database.clone())
    }

    /// Resolves when an engine reports a fatal error; the caller should then
    /// invoke [`stop`](Self::stop).
    #[must_use]
    pub fn fatal_signal(&self) -> Arc<Notify> {
        self.fatal.clone()
    }

    /// Opens the database, runs migrations and wires the persistence
    /// handlers. Idempotent.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the database cannot be opened or migrated, or
    /// when called after `stop`.
    pub async fn initialize(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        match inner.state {
            State::Created => {}
            State::Stopped => {
                return Err(Error::InvalidState {
                    message: "the crawler is stopped".to_string(),
                })
            }
            _ => return Ok(()),
        }

        let database: Arc<Box<dyn Database>> = Arc::new(crate::storage::connect(&self.config.database.path)?);

        let stats_repo = statistics::Keeper::new().repository;

        let dispatcher = events::Dispatcher::new();
        let event_sender = dispatcher.run_event_listener(stats_repo.clone());

        register_persistence_handlers(&dispatcher, &database, &self.fatal);

        inner.runtime = Some(Runtime {
            database,
            dispatcher,
            event_sender,
            stats_repo,
            dht: None,
            fetcher: None,
            jobs: Vec::new(),
            crawl_subscription: None,
        });
        inner.state = State::Initialized;

        info!(target: CONTROLLER_LOG_TARGET, "crawler initialized");

        Ok(())
    }

    /// Launches the DHT engine and the metadata fetcher. Idempotent.
    ///
    /// # Errors
    ///
    /// Will return `Err` when not initialized or when an engine cannot be
    /// started.
    pub async fn start(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        match inner.state {
            State::Initialized => {}
            State::Running | State::Crawling => return Ok(()),
            state => {
                return Err(Error::InvalidState {
                    message: format!("cannot start from {state:?}"),
                })
            }
        }

        let runtime = inner.runtime.as_mut().expect("the initialized state implies a runtime");

        let mut stats_keeper = statistics::Keeper {
            repository: runtime.stats_repo.clone(),
        };

        // the DHT engine first; the fetcher consumes what it discovers
        let dht = Arc::new(
            DhtEngine::new(&self.config, runtime.event_sender.clone(), Some(stats_keeper.run_event_listener()))
                .await
                .map_err(|e| Error::EngineStart { message: e.to_string() })?,
        );

        let (tx_halt, rx_halt) = oneshot::channel();
        let handle = tokio::spawn(dht.clone().run(rx_halt));
        runtime.jobs.push(Job {
            name: "dht engine",
            tx_halt,
            handle,
        });
        runtime.dht = Some(dht);

        let fetcher = Arc::new(MetadataFetcher::new(
            &self.config,
            runtime.database.clone(),
            runtime.event_sender.clone(),
            Some(stats_keeper.run_event_listener()),
        ));

        let (tx_halt, rx_halt) = oneshot::channel();
        let handle = tokio::spawn(fetcher.clone().run(rx_halt));
        runtime.jobs.push(Job {
            name: "metadata fetcher",
            tx_halt,
            handle,
        });
        runtime.fetcher = Some(fetcher);

        inner.state = State::Running;

        info!(target: CONTROLLER_LOG_TARGET, "crawler started");

        Ok(())
    }

    /// Feeds discovered peers to the metadata fetcher. Idempotent.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the crawler is not running.
    pub async fn start_crawling(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        match inner.state {
            State::Running => {}
            State::Crawling => return Ok(()),
            state => {
                return Err(Error::InvalidState {
                    message: format!("cannot start crawling from {state:?}"),
                })
            }
        }

        let runtime = inner.runtime.as_mut().expect("the running state implies a runtime");
        let fetcher = runtime.fetcher.clone().expect("the running state implies a fetcher");

        let subscription = runtime.dispatcher.bus.subscribe(
            EventKind::PeerFound,
            Arc::new(move |event| {
                let fetcher = fetcher.clone();
                async move {
                    if let Event::PeerFound { info_hash, endpoint } = event {
                        fetcher.trigger(info_hash, endpoint);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        runtime.crawl_subscription = Some(subscription);
        inner.state = State::Crawling;

        info!(target: CONTROLLER_LOG_TARGET, "crawling started");

        Ok(())
    }

    /// Stops feeding peers to the fetcher; the engines keep running.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the crawler is not running.
    pub async fn stop_crawling(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        match inner.state {
            State::Crawling => {}
            State::Running => return Ok(()),
            state => {
                return Err(Error::InvalidState {
                    message: format!("cannot stop crawling from {state:?}"),
                })
            }
        }

        let runtime = inner.runtime.as_mut().expect("the crawling state implies a runtime");
        if let Some(subscription) = runtime.crawl_subscription.take() {
            runtime.dispatcher.bus.unsubscribe(subscription);
        }

        inner.state = State::Running;

        info!(target: CONTROLLER_LOG_TARGET, "crawling stopped");

        Ok(())
    }

    /// Tears everything down, engines in reverse construction order with a
    /// deadline each. Terminal and idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;

        if inner.state == State::Stopped {
            return;
        }

        if let Some(mut runtime) = inner.runtime.take() {
            for job in runtime.jobs.drain(..).rev() {
                info!(target: CONTROLLER_LOG_TARGET, engine = job.name, "stopping");

                drop(job.tx_halt.send(Halted::Normal));

                let abort = job.handle.abort_handle();
                if tokio::time::timeout(ENGINE_STOP_TIMEOUT, job.handle).await.is_err() {
                    warn!(target: CONTROLLER_LOG_TARGET, engine = job.name, "did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        inner.state = State::Stopped;

        info!(target: CONTROLLER_LOG_TARGET, "crawler stopped");
    }

    /// A flat map of statistics from every subsystem, keys prefixed
    /// `controller.*`, `dht.*`, `bt.*` and `storage.*`.
    pub async fn statistics(&self) -> BTreeMap<String, String> {
        let inner = self.inner.read().await;

        let mut map = BTreeMap::new();
        map.insert("controller.state".to_string(), format!("{:?}", inner.state));
        map.insert(
            "controller.running".to_string(),
            matches!(inner.state, State::Running | State::Crawling).to_string(),
        );
        map.insert(
            "controller.crawling".to_string(),
            (inner.state == State::Crawling).to_string(),
        );

        let Some(runtime) = &inner.runtime else {
            return map;
        };

        map.append(&mut runtime.stats_repo.get_metrics().await.to_map());

        if let Some(dht) = &runtime.dht {
            map.insert("dht.routing_nodes".to_string(), dht.routing_node_count().await.to_string());
        }

        map.insert("storage.db_path".to_string(), self.config.database.path.clone());
        if let Ok(count) = runtime.database.count_nodes(&NodeQueryOptions::default()).await {
            map.insert("storage.node_count".to_string(), count.to_string());
        }
        if let Ok(count) = runtime.database.count_infohashes(&InfoHashQueryOptions::default()).await {
            map.insert("storage.infohash_count".to_string(), count.to_string());
        }
        if let Ok(count) = runtime.database.count_metadata(&MetadataQueryOptions::default()).await {
            map.insert("storage.metadata_count".to_string(), count.to_string());
        }
        if let Ok(count) = runtime.database.count_peers().await {
            map.insert("storage.peer_count".to_string(), count.to_string());
        }
        if let Ok(count) = runtime.database.count_trackers().await {
            map.insert("storage.tracker_count".to_string(), count.to_string());
        }

        map
    }

    /// The current web front-end settings.
    pub async fn web_settings(&self) -> Web {
        *self.web_settings.read().await
    }

    /// Updates and persists `web.port`, the runtime-mutable half of the
    /// configuration together with `web.auto_start`.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the configuration file cannot be written.
    pub async fn set_web_port(&self, port: u16) -> Result<(), Error> {
        let mut settings = self.web_settings.write().await;
        settings.port = port;
        self.persist_web_settings(*settings)
    }

    /// Updates and persists `web.auto_start`.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the configuration file cannot be written.
    pub async fn set_web_auto_start(&self, auto_start: bool) -> Result<(), Error> {
        let mut settings = self.web_settings.write().await;
        settings.auto_start = auto_start;
        self.persist_web_settings(*settings)
    }

    fn persist_web_settings(&self, settings: Web) -> Result<(), Error> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };

        let mut config = self.config.clone();
        config.web = settings;
        config.save_to_file(path).map_err(|e| Error::InvalidConfiguration {
            message: format!("could not persist the web settings: {e}"),
        })
    }
}

/// Subscribes the handlers that turn discoveries into storage writes. Each
/// handler performs one write; errors bubble to the dispatcher where they
/// are logged and counted.
fn register_persistence_handlers(dispatcher: &events::Dispatcher, database: &Arc<Box<dyn Database>>, fatal: &Arc<Notify>) {
    let db = database.clone();
    dispatcher.bus.subscribe(
        EventKind::NodeFound,
        Arc::new(move |event| {
            let db = db.clone();
            async move {
                if let Event::NodeFound { node_id, endpoint } = event {
                    db.store_node(&node_id, &endpoint, true, None).await?;
                }
                Ok(())
            }
            .boxed()
        }),
    );

    let db = database.clone();
    dispatcher.bus.subscribe(
        EventKind::InfohashFound,
        Arc::new(move |event| {
            let db = db.clone();
            async move {
                if let Event::InfohashFound { info_hash, announced } = event {
                    db.store_infohash(&info_hash).await?;
                    if announced {
                        db.increment_infohash_announce_count(&info_hash).await?;
                    }
                }
                Ok(())
            }
            .boxed()
        }),
    );

    let db = database.clone();
    dispatcher.bus.subscribe(
        EventKind::PeerFound,
        Arc::new(move |event| {
            let db = db.clone();
            async move {
                if let Event::PeerFound { info_hash, endpoint } = event {
                    let capabilities = PeerCapabilities {
                        supports_dht: true,
                        ..Default::default()
                    };
                    db.store_peer(&info_hash, &endpoint, None, capabilities).await?;
                    db.increment_infohash_peer_count(&info_hash).await?;
                }
                Ok(())
            }
            .boxed()
        }),
    );

    let db = database.clone();
    dispatcher.bus.subscribe(
        EventKind::MetadataReceived,
        Arc::new(move |event| {
            let db = db.clone();
            async move {
                if let Event::MetadataReceived { info_hash, metadata } = event {
                    db.store_metadata(&info_hash, &metadata).await?;
                }
                Ok(())
            }
            .boxed()
        }),
    );

    let fatal = fatal.clone();
    dispatcher.bus.subscribe(
        EventKind::FatalError,
        Arc::new(move |event| {
            let fatal = fatal.clone();
            async move {
                if let Event::FatalError { message } = event {
                    warn!(target: CONTROLLER_LOG_TARGET, "fatal engine error: {message}");
                    fatal.notify_one();
                }
                Ok(())
            }
            .boxed()
        }),
    );
}
