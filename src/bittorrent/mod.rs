//! The `BitTorrent` peer engine.
//!
//! For every (infohash, peer) pair the DHT surfaces, the engine tries to
//! download the torrent's info dictionary over the ut_metadata extension.
//! Triggers go through a bounded FIFO that drops the oldest entry when full;
//! a worker drains it, filters out torrents that already have metadata,
//! in-flight infohashes and recently failed peers, and runs at most
//! `bittorrent.max_connections` sessions at a time.
//!
//! A verified download is published as `MetadataReceived`; a failure bumps
//! the peer's failure counter and suppresses that (infohash, peer) pair for
//! ten minutes.
pub mod extended;
pub mod handshake;
pub mod metadata;
pub mod session;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use swarmscan_clock::clock::Time;
use swarmscan_configuration::Configuration;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;
use swarmscan_primitives::DurationSinceUnixEpoch;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use self::session::Session;
use crate::core::{events, statistics};
use crate::signals::Halted;
use crate::storage::Database;
use crate::CurrentClock;

pub const BITTORRENT_LOG_TARGET: &str = "bittorrent";

/// A failed (infohash, peer) pair is not retried for this long.
const SUPPRESSION_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Pending triggers beyond this are dropped, oldest first.
const TRIGGER_QUEUE_CAPACITY: usize = 512;

/// A download trigger: fetch the metadata of `info_hash` from `endpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Trigger {
    info_hash: InfoHash,
    endpoint: Endpoint,
}

/// A bounded FIFO of pending triggers. When full, the oldest pending
/// trigger makes room for the new one; freshly discovered peers are more
/// likely to still be reachable.
struct TriggerQueue {
    triggers: std::sync::Mutex<VecDeque<Trigger>>,
    notify: Notify,
}

impl TriggerQueue {
    fn new() -> Self {
        Self {
            triggers: std::sync::Mutex::new(VecDeque::with_capacity(TRIGGER_QUEUE_CAPACITY)),
            notify: Notify::new(),
        }
    }

    fn push(&self, trigger: Trigger) {
        {
            let mut triggers = self.triggers.lock().expect("the trigger queue lock should not be poisoned");
            if triggers.len() >= TRIGGER_QUEUE_CAPACITY {
                triggers.pop_front();
            }
            triggers.push_back(trigger);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> Trigger {
        loop {
            let notified = self.notify.notified();

            if let Some(trigger) = self
                .triggers
                .lock()
                .expect("the trigger queue lock should not be poisoned")
                .pop_front()
            {
                return trigger;
            }

            notified.await;
        }
    }
}

/// The metadata fetcher. Shared behind an [`Arc`] between the trigger side
/// (the controller's `PeerFound` handler) and the worker.
pub struct MetadataFetcher {
    local_peer_id: NodeId,
    listen_port: u16,
    connect_timeout: Duration,
    download_timeout: Duration,
    session_permits: Arc<Semaphore>,
    queue: TriggerQueue,
    suppressed: std::sync::Mutex<HashMap<(InfoHash, Endpoint), DurationSinceUnixEpoch>>,
    in_flight: std::sync::Mutex<HashSet<InfoHash>>,
    database: Arc<Box<dyn Database>>,
    event_sender: Arc<dyn events::EventSender>,
    stats_event_sender: Option<Box<dyn statistics::EventSender>>,
}

impl MetadataFetcher {
    #[must_use]
    pub fn new(
        config: &Configuration,
        database: Arc<Box<dyn Database>>,
        event_sender: Arc<dyn events::EventSender>,
        stats_event_sender: Option<Box<dyn statistics::EventSender>>,
    ) -> Self {
        Self {
            local_peer_id: NodeId::random(),
            listen_port: config.dht.port,
            connect_timeout: config.bittorrent.connection_timeout(),
            download_timeout: config.bittorrent.download_timeout(),
            session_permits: Arc::new(Semaphore::new(config.bittorrent.max_connections as usize)),
            queue: TriggerQueue::new(),
            suppressed: std::sync::Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
            database,
            event_sender,
            stats_event_sender,
        }
    }

    /// Queues a download attempt. Cheap and non-blocking; the worker does
    /// the filtering.
    pub fn trigger(&self, info_hash: InfoHash, endpoint: Endpoint) {
        self.queue.push(Trigger { info_hash, endpoint });
    }

    /// Runs the worker until halted.
    pub async fn run(self: Arc<Self>, rx_halt: tokio::sync::oneshot::Receiver<Halted>) {
        let fetcher = self.clone();
        let worker = tokio::spawn(async move { fetcher.worker_loop().await });

        crate::signals::shutdown_signal_with_message(rx_halt, "halting the metadata fetcher".to_string()).await;

        worker.abort();
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let trigger = self.queue.pop().await;

            if self.is_suppressed(&trigger) || !self.claim(trigger.info_hash) {
                continue;
            }

            if self.has_stored_metadata(&trigger.info_hash).await {
                self.release(trigger.info_hash);
                continue;
            }

            let permit = self
                .session_permits
                .clone()
                .acquire_owned()
                .await
                .expect("the session semaphore is never closed");

            let fetcher = self.clone();
            tokio::spawn(async move {
                fetcher.run_session(trigger).await;
                fetcher.release(trigger.info_hash);
                drop(permit);
            });
        }
    }

    async fn run_session(&self, trigger: Trigger) {
        self.send_stat(statistics::Event::BtSessionStarted).await;
        debug!(target: BITTORRENT_LOG_TARGET, info_hash = %trigger.info_hash, peer = %trigger.endpoint, "session starting");

        let mut session = Session::new(
            trigger.endpoint,
            trigger.info_hash,
            self.local_peer_id,
            self.listen_port,
            self.connect_timeout,
        );

        let outcome = match tokio::time::timeout(self.download_timeout, session.run()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(session::SessionError::Timeout),
        };

        match outcome {
            Ok(outcome) => {
                self.send_stat(statistics::Event::BtSessionCompleted).await;
                info!(
                    target: BITTORRENT_LOG_TARGET,
                    info_hash = %trigger.info_hash,
                    name = %outcome.metadata.name,
                    "metadata downloaded"
                );

                // the handshake told us who the peer is and what it speaks
                drop(
                    self.database
                        .store_peer(
                            &trigger.info_hash,
                            &trigger.endpoint,
                            Some(&outcome.peer_id),
                            outcome.capabilities,
                        )
                        .await,
                );

                drop(
                    self.event_sender
                        .send_event(events::Event::MetadataReceived {
                            info_hash: trigger.info_hash,
                            metadata: outcome.metadata,
                        })
                        .await,
                );
            }
            Err(e) => {
                self.send_stat(statistics::Event::BtSessionFailed).await;
                debug!(
                    target: BITTORRENT_LOG_TARGET,
                    info_hash = %trigger.info_hash,
                    peer = %trigger.endpoint,
                    err = %e,
                    "session failed"
                );

                self.suppress(trigger);
                drop(
                    self.database
                        .increment_peer_failure_count(&trigger.info_hash, &trigger.endpoint)
                        .await,
                );
            }
        }
    }

    async fn has_stored_metadata(&self, info_hash: &InfoHash) -> bool {
        matches!(self.database.get_metadata(info_hash).await, Ok(Some(_)))
    }

    fn is_suppressed(&self, trigger: &Trigger) -> bool {
        let now = CurrentClock::now();
        let mut suppressed = self.suppressed.lock().expect("the suppression lock should not be poisoned");

        suppressed.retain(|_, failed_at| now.saturating_sub(*failed_at) < SUPPRESSION_WINDOW);
        suppressed.contains_key(&(trigger.info_hash, trigger.endpoint))
    }

    fn suppress(&self, trigger: Trigger) {
        let mut suppressed = self.suppressed.lock().expect("the suppression lock should not be poisoned");
        suppressed.insert((trigger.info_hash, trigger.endpoint), CurrentClock::now());
    }

    /// At most one session per infohash; the claim fails while one runs.
    fn claim(&self, info_hash: InfoHash) -> bool {
        self.in_flight
            .lock()
            .expect("the in-flight lock should not be poisoned")
            .insert(info_hash)
    }

    fn release(&self, info_hash: InfoHash) {
        self.in_flight
            .lock()
            .expect("the in-flight lock should not be poisoned")
            .remove(&info_hash);
    }

    async fn send_stat(&self, event: statistics::Event) {
        if let Some(sender) = &self.stats_event_sender {
            drop(sender.send_event(event).await);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use swarmscan_bencode::{ben_bytes, ben_int, ben_map};
    use swarmscan_primitives::endpoint::Endpoint;
    use swarmscan_primitives::info_hash::InfoHash;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::error::SendError;

    use super::extended::{EXTENDED_HANDSHAKE_ID, EXTENDED_MESSAGE_ID};
    use super::handshake::{Handshake, HANDSHAKE_LEN};
    use super::metadata::info_hash_of;
    use super::{MetadataFetcher, Trigger};
    use crate::core::{events, statistics};
    use crate::storage::{connect, Database};

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

    fn test_fetcher() -> (Arc<MetadataFetcher>, Arc<Mutex<Vec<events::Event>>>, statistics::Repo, Arc<Box<dyn Database>>) {
        let config = swarmscan_test_helpers::configuration::ephemeral();
        let database: Arc<Box<dyn Database>> = Arc::new(connect(&config.database.path).unwrap());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sender = Arc::new(CollectingSender { events: events.clone() });
        let (stats_sender, stats_repo) = statistics::Keeper::new_active_instance();

        let fetcher = Arc::new(MetadataFetcher::new(&config, database.clone(), sender, Some(stats_sender)));

        (fetcher, events, stats_repo, database)
    }

    fn one_piece_info() -> Vec<u8> {
        (ben_map! {
            "length" => ben_int!(321),
            "name" => ben_bytes!("fetcher test"),
            "piece length" => ben_int!(16384),
            "pieces" => ben_bytes!(vec![3u8; 20])
        })
        .encode()
    }

    /// A stub peer serving a single-piece metadata blob.
    async fn spawn_stub_peer(info_hash: InfoHash, served: Vec<u8>) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut buffer = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut buffer).await.unwrap();
            let reply = Handshake::outgoing(info_hash, swarmscan_primitives::node_id::NodeId::random());
            stream.write_all(&reply.to_bytes()).await.unwrap();

            // read frames; answer the extension handshake and the first
            // piece request
            let mut answered_handshake = false;
            loop {
                let mut len_bytes = [0u8; 4];
                if stream.read_exact(&mut len_bytes).await.is_err() {
                    return;
                }
                let len = u32::from_be_bytes(len_bytes) as usize;
                if len == 0 {
                    continue;
                }
                let mut message = vec![0u8; len];
                stream.read_exact(&mut message).await.unwrap();

                if message[0] != EXTENDED_MESSAGE_ID {
                    continue;
                }

                if message[1] == EXTENDED_HANDSHAKE_ID && !answered_handshake {
                    answered_handshake = true;
                    let payload = (ben_map! {
                        "m" => ben_map! {
                            "ut_metadata" => ben_int!(7)
                        },
                        "metadata_size" => ben_int!(i64::try_from(served.len()).unwrap())
                    })
                    .encode();
                    let mut frame = vec![EXTENDED_MESSAGE_ID, EXTENDED_HANDSHAKE_ID];
                    frame.extend_from_slice(&payload);
                    let len = u32::try_from(frame.len()).unwrap();
                    stream.write_all(&len.to_be_bytes()).await.unwrap();
                    stream.write_all(&frame).await.unwrap();
                } else if message[1] == 7 {
                    let header = (ben_map! {
                        "msg_type" => ben_int!(1),
                        "piece" => ben_int!(0),
                        "total_size" => ben_int!(i64::try_from(served.len()).unwrap())
                    })
                    .encode();
                    let mut frame = vec![EXTENDED_MESSAGE_ID, 1u8];
                    frame.extend_from_slice(&header);
                    frame.extend_from_slice(&served);
                    let len = u32::try_from(frame.len()).unwrap();
                    stream.write_all(&len.to_be_bytes()).await.unwrap();
                    stream.write_all(&frame).await.unwrap();
                    return;
                }
            }
        });

        Endpoint::from(addr)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn a_triggered_download_should_publish_metadata_received() {
        let (fetcher, events, stats, _) = test_fetcher();
        let raw = one_piece_info();
        let info_hash = info_hash_of(&raw);

        let endpoint = spawn_stub_peer(info_hash, raw).await;

        let worker = tokio::spawn(fetcher.clone().worker_loop());
        fetcher.trigger(info_hash, endpoint);

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if stats.get_metrics().await.bt_sessions_completed > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("the session should complete");
        worker.abort();

        let published = events.lock().unwrap();
        assert!(published.iter().any(|event| matches!(
            event,
            events::Event::MetadataReceived { info_hash: found, metadata } if *found == info_hash && metadata.name == "fetcher test"
        )));
    }

    #[tokio::test]
    async fn a_failed_download_should_bump_the_peer_failure_counter_and_suppress_retries() {
        let (fetcher, events, stats, database) = test_fetcher();
        let info_hash = InfoHash::random();

        // an endpoint that refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        drop(listener);

        database
            .store_peer(&info_hash, &endpoint, None, crate::storage::models::PeerCapabilities::default())
            .await
            .unwrap();

        let worker = tokio::spawn(fetcher.clone().worker_loop());
        fetcher.trigger(info_hash, endpoint);

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if stats.get_metrics().await.bt_sessions_failed > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("the session should fail");

        // a second trigger inside the suppression window starts nothing
        fetcher.trigger(info_hash, endpoint);
        settle().await;
        worker.abort();

        assert_eq!(stats.get_metrics().await.bt_sessions_started, 1);
        let record = database.get_peer(&info_hash, &endpoint).await.unwrap().unwrap();
        assert_eq!(record.failure_count, 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_torrent_with_stored_metadata_should_not_start_a_session() {
        let (fetcher, _, stats, database) = test_fetcher();
        let raw = one_piece_info();
        let info_hash = info_hash_of(&raw);

        let metadata = super::metadata::MetadataInfo::from_bytes(&raw).unwrap();
        database.store_metadata(&info_hash, &metadata).await.unwrap();

        let worker = tokio::spawn(fetcher.clone().worker_loop());
        fetcher.trigger(info_hash, "127.0.0.1:1".parse().unwrap());
        settle().await;
        worker.abort();

        assert_eq!(stats.get_metrics().await.bt_sessions_started, 0);
    }

    #[test]
    fn the_trigger_queue_should_drop_the_oldest_entry_when_full() {
        let queue = super::TriggerQueue::new();

        for i in 0..=super::TRIGGER_QUEUE_CAPACITY {
            queue.push(Trigger {
                info_hash: InfoHash([u8::try_from(i % 251).unwrap(); 20]),
                endpoint: "127.0.0.1:1".parse().unwrap(),
            });
        }

        let triggers = queue.triggers.lock().unwrap();
        assert_eq!(triggers.len(), super::TRIGGER_QUEUE_CAPACITY);
        // the first pushed trigger is gone
        assert_eq!(triggers.front().unwrap().info_hash, InfoHash([1u8; 20]));
    }
}
