//! The DHT engine.
//!
//! One UDP socket, one receive loop, and a handful of periodic tasks crawl
//! the Kademlia overlay: the engine answers `ping`, `find_node`, `get_peers`
//! and `announce_peer` queries like any well-behaved node, but its real job
//! is the harvest — every message teaches it a node, and every `get_peers`
//! or `announce_peer` it receives surfaces an infohash and possibly a peer.
//! Discoveries are published on the domain event bus; the controller
//! persists them.
pub mod lookup;
pub mod messages;
pub mod routing;
pub mod socket;
pub mod tokens;
pub mod transactions;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use swarmscan_clock::clock::Time;
use swarmscan_configuration::Configuration;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;
use swarmscan_primitives::DurationSinceUnixEpoch;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use self::lookup::{LookupSet, ALPHA, LOOKUP_BUDGET};
use self::messages::{Message, MessageBody, NodeInfo, Query, Response, ERROR_PROTOCOL};
use self::routing::table::{AddOutcome, RoutingTable};
use self::routing::BUCKET_SIZE;
use self::socket::BoundSocket;
use self::tokens::{TokenManager, ROTATION_INTERVAL};
use self::transactions::{RemoteError, TransactionManager, DEFAULT_QUERY_TIMEOUT};
use crate::core::{events, statistics};
use crate::signals::Halted;
use crate::CurrentClock;

pub const DHT_LOG_TARGET: &str = "dht";

/// Largest UDP payload the engine reads.
const MAX_PACKET_SIZE: usize = 4096;

/// Deadline for bootstrap pings.
const BOOTSTRAP_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// A routing table smaller than this after bootstrap triggers a self lookup.
const MIN_NODES_AFTER_BOOTSTRAP: usize = 8;

/// Retransmissions after the first send of a query.
const QUERY_RETRIES: usize = 2;

/// Waits before each retransmission.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// A bucket untouched for this long gets refreshed.
const BUCKET_REFRESH_AGE: Duration = Duration::from_secs(15 * 60);

/// How often the refresh check runs.
const BUCKET_REFRESH_TICK: Duration = Duration::from_secs(60);

/// How often a random target is probed for infohashes.
const RANDOM_DISCOVERY_TICK: Duration = Duration::from_secs(30);

/// Announced peers older than this are no longer handed out.
const ANNOUNCE_TTL: Duration = Duration::from_secs(30 * 60);

/// At most this many announced peers are remembered per infohash.
const ANNOUNCE_CAP: usize = 64;

/// What an iterative lookup asks the nodes it walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    GetPeers,
}

/// Why a query produced no response.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("the query timed out after all retries")]
    Timeout,

    #[error("the remote answered with an error: {source}")]
    Remote {
        #[from]
        source: RemoteError,
    },

    #[error("the engine is shutting down")]
    Cancelled,

    #[error("could not send the query: {message}")]
    Io { message: String },
}

/// Why the engine could not be built.
#[derive(thiserror::Error, Debug)]
pub enum DhtEngineError {
    #[error("the configured dht.node_id is not a 40-char hex string")]
    InvalidNodeId,

    #[error("could not bind the DHT socket: {source}")]
    Bind { source: std::io::Error },
}

/// The DHT engine. Shared behind an [`Arc`]; the receive loop and the
/// periodic tasks all run against the same instance.
pub struct DhtEngine {
    local_id: NodeId,
    socket: BoundSocket,
    routing_table: Mutex<RoutingTable>,
    transactions: TransactionManager,
    tokens: TokenManager,
    /// Peers learned from `announce_peer`, handed out in `get_peers`
    /// responses.
    announces: Mutex<HashMap<InfoHash, HashMap<Endpoint, DurationSinceUnixEpoch>>>,
    event_sender: Arc<dyn events::EventSender>,
    stats_event_sender: Option<Box<dyn statistics::EventSender>>,
    max_nodes: usize,
    random_discovery: bool,
    /// How often questionable nodes are probed (`dht.ping_interval`).
    probe_interval: Duration,
    bootstrap_nodes: Vec<String>,
}

impl DhtEngine {
    /// Binds the UDP socket and builds the engine.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the socket cannot be bound or the configured
    /// node id is malformed. Both are fatal; there is no crawler without a
    /// socket and an identity.
    pub async fn new(
        config: &Configuration,
        event_sender: Arc<dyn events::EventSender>,
        stats_event_sender: Option<Box<dyn statistics::EventSender>>,
    ) -> Result<DhtEngine, DhtEngineError> {
        let local_id = match &config.dht.node_id {
            Some(hex) => NodeId::from_str(hex).map_err(|_| DhtEngineError::InvalidNodeId)?,
            None => NodeId::random(),
        };

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.dht.port);
        let socket = BoundSocket::new(bind_addr)
            .await
            .map_err(|e| DhtEngineError::Bind { source: *e })?;

        info!(target: DHT_LOG_TARGET, local_id = %local_id, addr = %socket.address(), "DHT engine bound");

        Ok(DhtEngine {
            local_id,
            socket,
            routing_table: Mutex::new(RoutingTable::new(local_id, CurrentClock::now())),
            transactions: TransactionManager::new(),
            tokens: TokenManager::new(),
            announces: Mutex::new(HashMap::new()),
            event_sender,
            stats_event_sender,
            max_nodes: config.dht.max_nodes as usize,
            random_discovery: config.crawler.random_discovery,
            probe_interval: config.dht.ping_interval(),
            bootstrap_nodes: config.dht.bootstrap_nodes.clone(),
        })
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.address()
    }

    /// Number of nodes currently in the routing table.
    pub async fn routing_node_count(&self) -> usize {
        self.routing_table.lock().await.node_count()
    }

    /// Runs the engine until halted: the receive loop, the bootstrap and the
    /// discovery loops.
    pub async fn run(self: Arc<Self>, rx_halt: tokio::sync::oneshot::Receiver<Halted>) {
        let mut tasks = JoinSet::new();

        let engine = self.clone();
        tasks.spawn(async move { engine.receive_loop().await });

        let engine = self.clone();
        tasks.spawn(async move { engine.bootstrap().await });

        let engine = self.clone();
        tasks.spawn(async move { engine.refresh_loop().await });

        let engine = self.clone();
        tasks.spawn(async move { engine.rotation_loop().await });

        let engine = self.clone();
        tasks.spawn(async move { engine.probe_loop().await });

        if self.random_discovery {
            let engine = self.clone();
            tasks.spawn(async move { engine.discovery_loop().await });
        }

        crate::signals::shutdown_signal_with_message(rx_halt, "halting the DHT engine".to_string()).await;

        tasks.shutdown().await;
    }

    async fn send_stat(&self, event: statistics::Event) {
        if let Some(sender) = &self.stats_event_sender {
            drop(sender.send_event(event).await);
        }
    }

    async fn publish(&self, event: events::Event) {
        drop(self.event_sender.send_event(event).await);
    }

    // Receive path

    async fn receive_loop(self: Arc<Self>) {
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let mut consecutive_errors = 0u32;

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, from)) => {
                    consecutive_errors = 0;
                    self.handle_packet(&buffer[..len], Endpoint::from(from)).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > 1 {
                        self.publish(events::Event::FatalError {
                            message: format!("DHT socket receive failed repeatedly: {e}"),
                        })
                        .await;
                        return;
                    }
                    warn!(target: DHT_LOG_TARGET, err = %e, "receive failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Decodes and dispatches one datagram. Malformed packets are dropped
    /// and counted.
    pub(crate) async fn handle_packet(self: &Arc<Self>, bytes: &[u8], from: Endpoint) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(target: DHT_LOG_TARGET, from = %from, err = %e, "dropping undecodable packet");
                self.send_stat(statistics::Event::DhtDecodeError).await;
                return;
            }
        };

        match message.body {
            MessageBody::Query(ref query) => {
                self.observe_sender(query.sender_id(), from, true).await;
                self.send_stat(statistics::Event::DhtQueryReceived).await;

                let reply = self.handle_query(message.transaction_id.clone(), query.clone(), from).await;
                self.send_message(&reply, from).await;
            }
            MessageBody::Response(response) => {
                self.observe_sender(response.id, from, false).await;

                match TransactionManager::parse_wire_id(&message.transaction_id) {
                    Some(id) if self.transactions.complete(id, Ok(response)) => {
                        self.send_stat(statistics::Event::DhtResponseReceived).await;
                    }
                    _ => {
                        debug!(target: DHT_LOG_TARGET, from = %from, "dropping response with unknown transaction id");
                        self.send_stat(statistics::Event::DhtUnknownTransaction).await;
                    }
                }
            }
            MessageBody::Error { code, message: text } => {
                self.send_stat(statistics::Event::DhtProtocolError).await;

                if let Some(id) = TransactionManager::parse_wire_id(&message.transaction_id) {
                    self.transactions.complete(id, Err(RemoteError { code, message: text }));
                }
            }
        }
    }

    /// Builds the reply to an incoming query.
    pub(crate) async fn handle_query(&self, transaction_id: Vec<u8>, query: Query, from: Endpoint) -> Message {
        match query {
            Query::Ping { .. } => Message::response(transaction_id, Response::only_id(self.local_id)),

            Query::FindNode { target, .. } => {
                let nodes = self.closest_node_infos(&target).await;
                Message::response(
                    transaction_id,
                    Response {
                        id: self.local_id,
                        nodes,
                        values: Vec::new(),
                        token: None,
                    },
                )
            }

            Query::GetPeers { info_hash, .. } => {
                self.send_stat(statistics::Event::DhtInfohashDiscovered).await;
                self.publish(events::Event::InfohashFound {
                    info_hash,
                    announced: false,
                })
                .await;

                let token = Some(self.tokens.issue(&from));
                let values = self.announced_peers(&info_hash).await;

                let nodes = if values.is_empty() {
                    self.closest_node_infos(&info_hash.as_node_id()).await
                } else {
                    Vec::new()
                };

                Message::response(
                    transaction_id,
                    Response {
                        id: self.local_id,
                        nodes,
                        values,
                        token,
                    },
                )
            }

            Query::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
                ..
            } => {
                if !self.tokens.verify(&from, &token) {
                    debug!(target: DHT_LOG_TARGET, from = %from, info_hash = %info_hash, "announce with invalid token");
                    self.send_stat(statistics::Event::DhtProtocolError).await;
                    return Message::error(transaction_id, ERROR_PROTOCOL, "Protocol Error");
                }

                // implied_port means "use my UDP source port", for peers
                // behind NAT that do not know their external port
                let peer_endpoint = if implied_port { from } else { from.with_port(port) };

                self.record_announce(info_hash, peer_endpoint).await;

                self.send_stat(statistics::Event::DhtInfohashDiscovered).await;
                self.send_stat(statistics::Event::DhtPeerDiscovered).await;
                self.publish(events::Event::InfohashFound {
                    info_hash,
                    announced: true,
                })
                .await;
                self.publish(events::Event::PeerFound {
                    info_hash,
                    endpoint: peer_endpoint,
                })
                .await;

                Message::response(transaction_id, Response::only_id(self.local_id))
            }
        }
    }

    /// Every incoming message teaches the table its sender.
    async fn observe_sender(self: &Arc<Self>, id: NodeId, endpoint: Endpoint, is_query: bool) {
        let now = CurrentClock::now();
        let outcome = {
            let mut table = self.routing_table.lock().await;

            if table.node_count() >= self.max_nodes && !table.contains(&id) {
                return;
            }

            let outcome = table.add_candidate(id, endpoint, now);
            if is_query {
                table.mark_query(&id, now);
            } else {
                table.mark_response(&id, now);
            }
            outcome
        };

        match outcome {
            AddOutcome::Added | AddOutcome::Replaced { .. } => {
                self.send_stat(statistics::Event::DhtNodeDiscovered).await;
                self.publish(events::Event::NodeFound { node_id: id, endpoint }).await;
            }
            AddOutcome::Updated => {
                // the record still gets its last_seen touched
                self.publish(events::Event::NodeFound { node_id: id, endpoint }).await;
            }
            AddOutcome::NeedsProbe {
                id: probe_id,
                endpoint: probe_endpoint,
            } => {
                debug!(target: DHT_LOG_TARGET, node = %probe_id, "probing questionable node before eviction");
                self.spawn_probe(probe_endpoint);
            }
            AddOutcome::Discarded => {}
        }
    }

    fn spawn_probe(self: &Arc<Self>, endpoint: Endpoint) {
        // a weak reference so a late probe cannot keep the engine alive
        // past shutdown
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(engine) = engine.upgrade() {
                drop(engine.ping(endpoint, DEFAULT_QUERY_TIMEOUT).await);
            }
        });
    }

    async fn closest_node_infos(&self, target: &NodeId) -> Vec<NodeInfo> {
        let table = self.routing_table.lock().await;
        table
            .closest(target, BUCKET_SIZE)
            .into_iter()
            .map(|node| NodeInfo {
                id: node.id,
                endpoint: node.endpoint,
            })
            .collect()
    }

    // Announce cache

    async fn record_announce(&self, info_hash: InfoHash, endpoint: Endpoint) {
        let now = CurrentClock::now();
        let mut announces = self.announces.lock().await;
        let peers = announces.entry(info_hash).or_default();

        peers.retain(|_, seen| now.saturating_sub(*seen) < ANNOUNCE_TTL);
        if peers.len() < ANNOUNCE_CAP || peers.contains_key(&endpoint) {
            peers.insert(endpoint, now);
        }
    }

    async fn announced_peers(&self, info_hash: &InfoHash) -> Vec<Endpoint> {
        let now = CurrentClock::now();
        let mut announces = self.announces.lock().await;

        match announces.get_mut(info_hash) {
            Some(peers) => {
                peers.retain(|_, seen| now.saturating_sub(*seen) < ANNOUNCE_TTL);
                peers.keys().copied().collect()
            }
            None => Vec::new(),
        }
    }

    // Outgoing queries

    async fn send_message(&self, message: &Message, to: Endpoint) {
        // losing a reply is the remote's problem, like any UDP node
        drop(self.socket.send_to(&message.encode(), SocketAddr::from(to)).await);
    }

    /// Sends a query and awaits its response, retransmitting on timeout with
    /// backoff. Error responses are terminal; a node that stays silent
    /// through all retries is marked timed out in the routing table.
    ///
    /// # Errors
    ///
    /// Will return `Err` on timeout, remote error, shutdown or send failure.
    pub async fn send_query(&self, to: Endpoint, query: Query, deadline: Duration) -> Result<Response, QueryError> {
        for attempt in 0..=QUERY_RETRIES {
            let (id, rx) = self.transactions.register();
            let message = Message::query(TransactionManager::wire_id(id), query.clone());

            if let Err(e) = self.socket.send_to(&message.encode(), SocketAddr::from(to)).await {
                self.transactions.cancel(id);
                return Err(QueryError::Io { message: e.to_string() });
            }
            self.send_stat(statistics::Event::DhtQuerySent).await;

            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(Ok(response))) => return Ok(response),
                Ok(Ok(Err(remote))) => return Err(remote.into()),
                Ok(Err(_)) => return Err(QueryError::Cancelled),
                Err(_) => {
                    self.transactions.cancel(id);
                    if attempt < QUERY_RETRIES {
                        tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    }
                }
            }
        }

        // whatever we asked, silence degrades the node
        let mut table = self.routing_table.lock().await;
        table.mark_timeout_by_endpoint(&to, CurrentClock::now());

        Err(QueryError::Timeout)
    }

    /// Pings an endpoint, returning the responder's id.
    ///
    /// # Errors
    ///
    /// Will return `Err` when no valid response arrives in time.
    pub async fn ping(&self, to: Endpoint, deadline: Duration) -> Result<NodeId, QueryError> {
        let response = self.send_query(to, Query::Ping { id: self.local_id }, deadline).await?;
        Ok(response.id)
    }

    // Bootstrap

    /// Resolves and pings the configured bootstrap nodes, then fills the
    /// table with a lookup for the local id if it is still sparse.
    pub async fn bootstrap(&self) {
        let mut responders = 0usize;

        for host in &self.bootstrap_nodes {
            let addrs = match tokio::net::lookup_host(host.as_str()).await {
                Ok(addrs) => addrs.filter(SocketAddr::is_ipv4).collect::<Vec<_>>(),
                Err(e) => {
                    warn!(target: DHT_LOG_TARGET, host = %host, err = %e, "could not resolve bootstrap node");
                    continue;
                }
            };

            for addr in addrs {
                match self.ping(Endpoint::from(addr), BOOTSTRAP_PING_TIMEOUT).await {
                    Ok(id) => {
                        debug!(target: DHT_LOG_TARGET, host = %host, id = %id, "bootstrap node responded");
                        responders += 1;
                    }
                    Err(e) => {
                        debug!(target: DHT_LOG_TARGET, host = %host, err = %e, "bootstrap ping failed");
                    }
                }
            }
        }

        info!(target: DHT_LOG_TARGET, responders, "bootstrap finished");

        if self.routing_node_count().await < MIN_NODES_AFTER_BOOTSTRAP {
            drop(self.find_closest(self.local_id, LookupKind::FindNode).await);
        }
    }

    // Iterative lookup

    /// Walks the overlay towards `target`, querying the closest known nodes
    /// until distance stops improving or the query budget runs out. Returns
    /// the closest nodes found. `GetPeers` lookups surface peers as
    /// `PeerFound` events along the way.
    pub async fn find_closest(&self, target: NodeId, kind: LookupKind) -> Vec<NodeInfo> {
        let mut set = LookupSet::new(target);

        for node in self.closest_node_infos(&target).await {
            set.insert(node);
        }

        let mut budget = LOOKUP_BUDGET;

        while budget > 0 && !set.converged(BUCKET_SIZE) {
            let batch = set.next_batch(ALPHA.min(budget));
            if batch.is_empty() {
                break;
            }
            budget -= batch.len();

            let queries = batch.iter().map(|node| {
                let query = match kind {
                    LookupKind::FindNode => Query::FindNode {
                        id: self.local_id,
                        target,
                    },
                    LookupKind::GetPeers => Query::GetPeers {
                        id: self.local_id,
                        info_hash: InfoHash::from(target),
                    },
                };
                self.send_query(node.endpoint, query, DEFAULT_QUERY_TIMEOUT)
            });

            let mut round_improved = false;

            for result in join_all(queries).await {
                let Ok(response) = result else { continue };

                for node in response.nodes {
                    round_improved |= set.insert(node);
                }

                if kind == LookupKind::GetPeers && !response.values.is_empty() {
                    let info_hash = InfoHash::from(target);
                    for endpoint in response.values {
                        self.send_stat(statistics::Event::DhtPeerDiscovered).await;
                        self.publish(events::Event::PeerFound { info_hash, endpoint }).await;
                    }
                }
            }

            if !round_improved {
                break;
            }
        }

        set.closest(BUCKET_SIZE)
    }

    // Periodic tasks

    async fn refresh_loop(&self) {
        let mut tick = tokio::time::interval(BUCKET_REFRESH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            let stale = {
                let table = self.routing_table.lock().await;
                table
                    .stale_buckets(CurrentClock::now(), BUCKET_REFRESH_AGE)
                    .iter()
                    .map(|prefix| table.random_id_in_bucket(*prefix))
                    .collect::<Vec<_>>()
            };

            for target in stale {
                debug!(target: DHT_LOG_TARGET, id = %target, "refreshing stale bucket");
                drop(self.find_closest(target, LookupKind::FindNode).await);
            }
        }
    }

    async fn discovery_loop(&self) {
        let mut tick = tokio::time::interval(RANDOM_DISCOVERY_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            let target = NodeId::random();
            debug!(target: DHT_LOG_TARGET, id = %target, "random discovery lookup");
            drop(self.find_closest(target, LookupKind::GetPeers).await);
        }
    }

    async fn rotation_loop(&self) {
        let mut tick = tokio::time::interval(ROTATION_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // the first interval tick fires immediately; skip it so the first
        // secret lives a full interval
        tick.tick().await;

        loop {
            tick.tick().await;
            self.tokens.rotate();
        }
    }

    async fn probe_loop(&self) {
        let mut tick = tokio::time::interval(self.probe_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            let targets = {
                let mut table = self.routing_table.lock().await;
                table.probe_targets()
            };

            for (_, endpoint) in targets {
                drop(self.ping(endpoint, DEFAULT_QUERY_TIMEOUT).await);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use swarmscan_primitives::endpoint::Endpoint;
    use swarmscan_primitives::info_hash::InfoHash;
    use tokio::sync::mpsc::error::SendError;

    use super::messages::{MessageBody, Query, ERROR_PROTOCOL};
    use super::{DhtEngine, LookupKind};
    use crate::core::{events, statistics};

    /// An event sender that records everything published on it.
    struct CollectingSender {
        events: Arc<Mutex<Vec<events::Event>>>,
    }

    #[async_trait]
    impl events::EventSender for CollectingSender {
        async fn send_event(&self, event: events::Event) -> Option<Result<(), SendError<events::Event>>> {
            self.events.lock().unwrap().push(event);
            Some(Ok(()))
        }
    }

    async fn test_engine() -> (Arc<DhtEngine>, Arc<Mutex<Vec<events::Event>>>, statistics::Repo) {
        let config = swarmscan_test_helpers::configuration::ephemeral();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sender = Arc::new(CollectingSender { events: events.clone() });
        let (stats_sender, stats_repo) = statistics::Keeper::new_active_instance();

        let engine = DhtEngine::new(&config, sender, Some(stats_sender))
            .await
            .expect("the test engine should bind");

        (Arc::new(engine), events, stats_repo)
    }

    fn announcer() -> Endpoint {
        "192.0.2.1:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn a_ping_query_should_be_answered_with_the_local_id() {
        let (engine, _, _) = test_engine().await;

        let reply = engine
            .handle_query(
                b"aa".to_vec(),
                Query::Ping {
                    id: swarmscan_primitives::node_id::NodeId::random(),
                },
                announcer(),
            )
            .await;

        match reply.body {
            MessageBody::Response(response) => assert_eq!(response.id, engine.local_id()),
            body => panic!("expected a response, got {body:?}"),
        }
    }

    #[tokio::test]
    async fn a_get_peers_query_should_issue_a_token_and_surface_the_infohash() {
        let (engine, events, _) = test_engine().await;
        let info_hash = InfoHash([0xAA; 20]);

        let reply = engine
            .handle_query(
                b"aa".to_vec(),
                Query::GetPeers {
                    id: swarmscan_primitives::node_id::NodeId::random(),
                    info_hash,
                },
                announcer(),
            )
            .await;

        let MessageBody::Response(response) = reply.body else {
            panic!("expected a response");
        };
        assert!(response.token.is_some());

        let published = events.lock().unwrap();
        assert!(published.contains(&events::Event::InfohashFound {
            info_hash,
            announced: false
        }));
    }

    #[tokio::test]
    async fn an_announce_with_a_previously_issued_token_should_be_accepted() {
        let (engine, events, _) = test_engine().await;
        let info_hash: InfoHash = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        let querier = swarmscan_primitives::node_id::NodeId::random();

        let reply = engine
            .handle_query(b"aa".to_vec(), Query::GetPeers { id: querier, info_hash }, announcer())
            .await;
        let MessageBody::Response(response) = reply.body else {
            panic!("expected a response");
        };
        let token = response.token.unwrap();

        let reply = engine
            .handle_query(
                b"ab".to_vec(),
                Query::AnnouncePeer {
                    id: querier,
                    info_hash,
                    port: 5000,
                    token,
                    implied_port: false,
                },
                announcer(),
            )
            .await;

        assert!(matches!(reply.body, MessageBody::Response(_)));

        let published = events.lock().unwrap();
        assert!(published.contains(&events::Event::InfohashFound {
            info_hash,
            announced: true
        }));
        assert!(published.contains(&events::Event::PeerFound {
            info_hash,
            endpoint: announcer(),
        }));
    }

    #[tokio::test]
    async fn an_announce_with_a_random_token_should_get_a_203_and_no_events() {
        let (engine, events, stats) = test_engine().await;
        let info_hash = InfoHash([0xAA; 20]);

        let reply = engine
            .handle_query(
                b"aa".to_vec(),
                Query::AnnouncePeer {
                    id: swarmscan_primitives::node_id::NodeId::random(),
                    info_hash,
                    port: 5000,
                    token: b"random".to_vec(),
                    implied_port: false,
                },
                announcer(),
            )
            .await;

        match reply.body {
            MessageBody::Error { code, .. } => assert_eq!(code, ERROR_PROTOCOL),
            body => panic!("expected an error, got {body:?}"),
        }

        assert!(events.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.get_metrics().await.dht_protocol_errors, 1);
    }

    #[tokio::test]
    async fn an_announce_with_implied_port_should_use_the_udp_source_port() {
        let (engine, events, _) = test_engine().await;
        let info_hash = InfoHash([0xBB; 20]);
        let querier = swarmscan_primitives::node_id::NodeId::random();

        let reply = engine
            .handle_query(b"aa".to_vec(), Query::GetPeers { id: querier, info_hash }, announcer())
            .await;
        let MessageBody::Response(response) = reply.body else {
            panic!("expected a response");
        };

        engine
            .handle_query(
                b"ab".to_vec(),
                Query::AnnouncePeer {
                    id: querier,
                    info_hash,
                    port: 9999,
                    token: response.token.unwrap(),
                    implied_port: true,
                },
                announcer(),
            )
            .await;

        let published = events.lock().unwrap();
        assert!(published.contains(&events::Event::PeerFound {
            info_hash,
            endpoint: announcer(),
        }));
    }

    #[tokio::test]
    async fn an_announced_peer_should_be_handed_out_to_a_later_get_peers() {
        let (engine, _, _) = test_engine().await;
        let info_hash = InfoHash([0xCC; 20]);
        let querier = swarmscan_primitives::node_id::NodeId::random();

        let reply = engine
            .handle_query(b"aa".to_vec(), Query::GetPeers { id: querier, info_hash }, announcer())
            .await;
        let MessageBody::Response(response) = reply.body else {
            panic!("expected a response");
        };

        engine
            .handle_query(
                b"ab".to_vec(),
                Query::AnnouncePeer {
                    id: querier,
                    info_hash,
                    port: 5000,
                    token: response.token.unwrap(),
                    implied_port: false,
                },
                announcer(),
            )
            .await;

        let reply = engine
            .handle_query(b"ac".to_vec(), Query::GetPeers { id: querier, info_hash }, announcer())
            .await;
        let MessageBody::Response(response) = reply.body else {
            panic!("expected a response");
        };

        assert_eq!(response.values, vec![announcer()]);
    }

    #[tokio::test]
    async fn an_undecodable_packet_should_be_dropped_and_counted() {
        let (engine, events, stats) = test_engine().await;

        engine.handle_packet(b"definitely not bencode", announcer()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.get_metrics().await.dht_decode_errors, 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_engines_should_ping_each_other_over_udp() {
        let (a, _, _) = test_engine().await;
        let (b, _, _) = test_engine().await;

        tokio::spawn(a.clone().receive_loop());
        tokio::spawn(b.clone().receive_loop());

        let mut b_addr = b.local_addr();
        if b_addr.ip().is_unspecified() {
            b_addr.set_ip("127.0.0.1".parse().unwrap());
        }

        let responder = tokio::time::timeout(
            Duration::from_secs(5),
            a.ping(Endpoint::from(b_addr), Duration::from_secs(3)),
        )
        .await
        .expect("the ping should not hit the outer deadline")
        .expect("the ping should be answered");

        assert_eq!(responder, b.local_id());
        assert_eq!(a.routing_node_count().await, 1);
    }

    #[tokio::test]
    async fn a_lookup_against_an_empty_table_should_return_nothing() {
        let (engine, _, _) = test_engine().await;

        let closest = engine
            .find_closest(swarmscan_primitives::node_id::NodeId::random(), LookupKind::FindNode)
            .await;

        assert!(closest.is_empty());
    }
}
