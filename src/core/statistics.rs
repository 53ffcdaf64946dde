//! Structs to collect and keep crawler metrics.
//!
//! The crawler collects metrics such as:
//!
//! - Number of DHT queries and responses handled
//! - Number of nodes, infohashes and peers discovered
//! - Number of metadata sessions started, completed and failed
//!
//! The data is collected by using an `event-sender -> event listener` model:
//! the engines send [`Event`]s through an [`EventSender`]; the [`Keeper`]
//! listens and uses the [`Repo`] to upgrade and store the counters.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::{automock, predicate::str};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, RwLock, RwLockReadGuard};
use tracing::debug;

const CHANNEL_BUFFER_SIZE: usize = 65_535;

/// A statistics event. It is used to collect crawler metrics.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    DhtQueryReceived,
    DhtQuerySent,
    DhtResponseReceived,
    DhtDecodeError,
    DhtProtocolError,
    DhtUnknownTransaction,
    DhtNodeDiscovered,
    DhtInfohashDiscovered,
    DhtPeerDiscovered,
    BtSessionStarted,
    BtSessionCompleted,
    BtSessionFailed,
    EventDispatched,
    HandlerError,
}

/// Metrics collected by the crawler.
#[derive(Debug, PartialEq, Default)]
pub struct Metrics {
    /// Total number of KRPC queries other nodes sent us.
    pub dht_queries_received: u64,
    /// Total number of KRPC queries we sent.
    pub dht_queries_sent: u64,
    /// Total number of KRPC responses delivered to a waiting transaction.
    pub dht_responses_received: u64,
    /// Packets that were not decodable as bencoded KRPC messages.
    pub dht_decode_errors: u64,
    /// Error responses and announce attempts with invalid tokens.
    pub dht_protocol_errors: u64,
    /// Responses whose transaction id matched nothing outstanding.
    pub dht_unknown_transactions: u64,
    /// Nodes added to the routing table for the first time.
    pub dht_nodes_discovered: u64,
    /// Infohashes surfaced by `get_peers` and `announce_peer` queries.
    pub dht_infohashes_discovered: u64,
    /// Peers surfaced by announces and lookups.
    pub dht_peers_discovered: u64,
    /// Metadata download sessions opened.
    pub bt_sessions_started: u64,
    /// Metadata download sessions that produced verified metadata.
    pub bt_sessions_completed: u64,
    /// Metadata download sessions that failed or timed out.
    pub bt_sessions_failed: u64,
    /// Domain events delivered to subscribers.
    pub events_dispatched: u64,
    /// Event handlers that returned an error.
    pub handler_errors: u64,
}

impl Metrics {
    /// The metrics as flat `prefix.key -> value` pairs, the shape the
    /// controller merges into its statistics map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("dht.queries_received".to_string(), self.dht_queries_received.to_string());
        map.insert("dht.queries_sent".to_string(), self.dht_queries_sent.to_string());
        map.insert("dht.responses_received".to_string(), self.dht_responses_received.to_string());
        map.insert("dht.decode_errors".to_string(), self.dht_decode_errors.to_string());
        map.insert("dht.protocol_errors".to_string(), self.dht_protocol_errors.to_string());
        map.insert(
            "dht.unknown_transactions".to_string(),
            self.dht_unknown_transactions.to_string(),
        );
        map.insert("dht.nodes_discovered".to_string(), self.dht_nodes_discovered.to_string());
        map.insert(
            "dht.infohashes_discovered".to_string(),
            self.dht_infohashes_discovered.to_string(),
        );
        map.insert("dht.peers_discovered".to_string(), self.dht_peers_discovered.to_string());
        map.insert("bt.sessions_started".to_string(), self.bt_sessions_started.to_string());
        map.insert("bt.sessions_completed".to_string(), self.bt_sessions_completed.to_string());
        map.insert("bt.sessions_failed".to_string(), self.bt_sessions_failed.to_string());
        map.insert("controller.events_dispatched".to_string(), self.events_dispatched.to_string());
        map.insert("controller.handler_errors".to_string(), self.handler_errors.to_string());
        map
    }
}

/// The service responsible for keeping the crawler metrics (listening to
/// statistics events and handling them).
///
/// It actively listens to new statistics events. When it receives a new
/// event it accordingly increases the counters.
pub struct Keeper {
    pub repository: Repo,
}

impl Default for Keeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Keeper {
    #[must_use]
    pub fn new() -> Self {
        Self { repository: Repo::new() }
    }

    #[must_use]
    pub fn new_active_instance() -> (Box<dyn EventSender>, Repo) {
        let mut keeper = Self::new();

        let event_sender = keeper.run_event_listener();

        (event_sender, keeper.repository)
    }

    pub fn run_event_listener(&mut self) -> Box<dyn EventSender> {
        let (sender, receiver) = mpsc::channel::<Event>(CHANNEL_BUFFER_SIZE);

        let repository = self.repository.clone();

        tokio::spawn(async move { event_listener(receiver, repository).await });

        Box::new(Sender { sender })
    }
}

async fn event_listener(mut receiver: mpsc::Receiver<Event>, repository: Repo) {
    while let Some(event) = receiver.recv().await {
        event_handler(event, &repository).await;
    }
}

async fn event_handler(event: Event, repository: &Repo) {
    {
        let mut metrics = repository.metrics.write().await;

        match event {
            Event::DhtQueryReceived => metrics.dht_queries_received += 1,
            Event::DhtQuerySent => metrics.dht_queries_sent += 1,
            Event::DhtResponseReceived => metrics.dht_responses_received += 1,
            Event::DhtDecodeError => metrics.dht_decode_errors += 1,
            Event::DhtProtocolError => metrics.dht_protocol_errors += 1,
            Event::DhtUnknownTransaction => metrics.dht_unknown_transactions += 1,
            Event::DhtNodeDiscovered => metrics.dht_nodes_discovered += 1,
            Event::DhtInfohashDiscovered => metrics.dht_infohashes_discovered += 1,
            Event::DhtPeerDiscovered => metrics.dht_peers_discovered += 1,
            Event::BtSessionStarted => metrics.bt_sessions_started += 1,
            Event::BtSessionCompleted => metrics.bt_sessions_completed += 1,
            Event::BtSessionFailed => metrics.bt_sessions_failed += 1,
            Event::EventDispatched => metrics.events_dispatched += 1,
            Event::HandlerError => metrics.handler_errors += 1,
        }
    }

    debug!(target: "statistics", "stats: {:?}", repository.get_metrics().await);
}

/// A trait to allow sending statistics events.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait EventSender: Sync + Send {
    async fn send_event(&self, event: Event) -> Option<Result<(), SendError<Event>>>;
}

/// An [`EventSender`] implementation backed by the keeper's channel.
pub struct Sender {
    sender: mpsc::Sender<Event>,
}

#[async_trait]
impl EventSender for Sender {
    async fn send_event(&self, event: Event) -> Option<Result<(), SendError<Event>>> {
        Some(self.sender.send(event).await)
    }
}

/// A repository for the crawler metrics.
#[derive(Clone)]
pub struct Repo {
    pub metrics: Arc<RwLock<Metrics>>,
}

impl Default for Repo {
    fn default() -> Self {
        Self::new()
    }
}

impl Repo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Metrics::default())),
        }
    }

    pub async fn get_metrics(&self) -> RwLockReadGuard<'_, Metrics> {
        self.metrics.read().await
    }

    pub async fn increase_handler_errors(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.handler_errors += 1;
        drop(metrics);
    }

    pub async fn increase_events_dispatched(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.events_dispatched += 1;
        drop(metrics);
    }
}

#[cfg(test)]
mod tests {

    mod the_keeper {
        use crate::core::statistics::{Event, Keeper, Metrics};

        #[tokio::test]
        async fn should_contain_the_crawler_statistics() {
            let keeper = Keeper::new();

            let metrics = keeper.repository.get_metrics().await;

            assert_eq!(metrics.dht_queries_received, Metrics::default().dht_queries_received);
        }

        #[tokio::test]
        async fn should_create_an_event_sender_to_send_statistical_events() {
            let mut keeper = Keeper::new();

            let event_sender = keeper.run_event_listener();

            let result = event_sender.send_event(Event::DhtQueryReceived).await;

            assert!(result.is_some());
        }
    }

    mod the_event_handler {
        use crate::core::statistics::{event_handler, Event, Repo};

        #[tokio::test]
        async fn should_increase_the_decode_error_counter_when_it_receives_a_decode_error_event() {
            let repository = Repo::new();

            event_handler(Event::DhtDecodeError, &repository).await;

            let metrics = repository.get_metrics().await;

            assert_eq!(metrics.dht_decode_errors, 1);
        }

        #[tokio::test]
        async fn should_increase_the_session_counters_independently() {
            let repository = Repo::new();

            event_handler(Event::BtSessionStarted, &repository).await;
            event_handler(Event::BtSessionStarted, &repository).await;
            event_handler(Event::BtSessionFailed, &repository).await;

            let metrics = repository.get_metrics().await;

            assert_eq!(metrics.bt_sessions_started, 2);
            assert_eq!(metrics.bt_sessions_failed, 1);
            assert_eq!(metrics.bt_sessions_completed, 0);
        }
    }

    mod the_metrics_map {
        use crate::core::statistics::{event_handler, Event, Repo};

        #[tokio::test]
        async fn should_expose_the_counters_under_prefixed_keys() {
            let repository = Repo::new();

            event_handler(Event::DhtProtocolError, &repository).await;

            let map = repository.get_metrics().await.to_map();

            assert_eq!(map.get("dht.protocol_errors"), Some(&"1".to_string()));
            assert_eq!(map.get("controller.handler_errors"), Some(&"0".to_string()));
        }
    }
}
