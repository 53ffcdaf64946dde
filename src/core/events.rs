//! The in-process domain event bus.
//!
//! Engines publish what they discover — nodes, infohashes, peers, metadata —
//! and the controller subscribes the handlers that persist each discovery.
//! Publication is a bounded channel send; delivery happens on one dedicated
//! dispatcher task, which is what gives handlers the per-publisher ordering
//! guarantee. Handlers run one at a time; a handler error is logged and
//! counted, never propagated.
//!
//! Subscribing and unsubscribing are plain lock operations, safe from any
//! task and from inside a running handler.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
#[cfg(test)]
use mockall::{automock, predicate::str};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tracing::warn;

use super::statistics;
use crate::bittorrent::metadata::MetadataInfo;
use swarmscan_primitives::endpoint::Endpoint;
use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;

const CHANNEL_BUFFER_SIZE: usize = 65_535;

const CORE_LOG_TARGET: &str = "controller";

/// A domain event published by one of the engines.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The DHT engine saw a node for the first time.
    NodeFound { node_id: NodeId, endpoint: Endpoint },
    /// An infohash surfaced in a `get_peers` or `announce_peer` query.
    /// `announced` is set when it arrived in an `announce_peer`.
    InfohashFound { info_hash: InfoHash, announced: bool },
    /// A peer became known for a torrent.
    PeerFound { info_hash: InfoHash, endpoint: Endpoint },
    /// A metadata download completed and verified.
    MetadataReceived { info_hash: InfoHash, metadata: MetadataInfo },
    /// An engine hit an unrecoverable error; the controller stops.
    FatalError { message: String },
}

/// The tag of an [`Event`] variant, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeFound,
    InfohashFound,
    PeerFound,
    MetadataReceived,
    FatalError,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NodeFound { .. } => EventKind::NodeFound,
            Event::InfohashFound { .. } => EventKind::InfohashFound,
            Event::PeerFound { .. } => EventKind::PeerFound,
            Event::MetadataReceived { .. } => EventKind::MetadataReceived,
            Event::FatalError { .. } => EventKind::FatalError,
        }
    }
}

/// What a handler reports back to the dispatcher. Errors end at the
/// dispatcher: logged and counted.
pub type HandlerResult = Result<(), super::error::Error>;

/// A subscribed event handler.
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Identifies one subscription, for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The subscriber registry: event kind → handlers, in subscription order.
#[derive(Default)]
pub struct Bus {
    subscribers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut subscribers = self.subscribers.write().expect("the bus lock should not be poisoned");
        subscribers.entry(kind).or_default().push((id, handler));

        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().expect("the bus lock should not be poisoned");
        for handlers in subscribers.values_mut() {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// A snapshot of the handlers for one kind; the dispatcher iterates the
    /// snapshot so handlers may re-enter the registry freely.
    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        let subscribers = self.subscribers.read().expect("the bus lock should not be poisoned");
        subscribers
            .get(&kind)
            .map(|handlers| handlers.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    }
}

/// A trait to allow publishing domain events.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait EventSender: Sync + Send {
    async fn send_event(&self, event: Event) -> Option<Result<(), SendError<Event>>>;
}

/// An [`EventSender`] implementation backed by the dispatcher's channel.
pub struct Sender {
    sender: mpsc::Sender<Event>,
}

#[async_trait]
impl EventSender for Sender {
    async fn send_event(&self, event: Event) -> Option<Result<(), SendError<Event>>> {
        Some(self.sender.send(event).await)
    }
}

/// Owns the registry and the dispatcher task.
pub struct Dispatcher {
    pub bus: Arc<Bus>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self { bus: Arc::new(Bus::new()) }
    }

    /// Spawns the dispatcher task and returns the sender side every engine
    /// publishes through.
    pub fn run_event_listener(&self, stats: statistics::Repo) -> Arc<dyn EventSender> {
        let (sender, receiver) = mpsc::channel::<Event>(CHANNEL_BUFFER_SIZE);

        let bus = self.bus.clone();

        tokio::spawn(async move { event_listener(receiver, bus, stats).await });

        Arc::new(Sender { sender })
    }
}

async fn event_listener(mut receiver: mpsc::Receiver<Event>, bus: Arc<Bus>, stats: statistics::Repo) {
    while let Some(event) = receiver.recv().await {
        for handler in bus.handlers_for(event.kind()) {
            if let Err(e) = handler(event.clone()).await {
                warn!(target: CORE_LOG_TARGET, kind = ?event.kind(), "event handler failed: {e}");
                stats.increase_handler_errors().await;
            }
        }
        stats.increase_events_dispatched().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::FutureExt;
    use swarmscan_primitives::info_hash::InfoHash;

    use super::super::statistics;
    use super::{Bus, Dispatcher, Event, EventKind, Handler};

    fn counting_handler(counter: Arc<AtomicU64>) -> Handler {
        Arc::new(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn a_published_event_should_reach_its_subscriber() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));

        dispatcher.bus.subscribe(EventKind::InfohashFound, counting_handler(counter.clone()));

        let sender = dispatcher.run_event_listener(statistics::Repo::new());
        sender
            .send_event(Event::InfohashFound {
                info_hash: InfoHash::random(),
                announced: false,
            })
            .await;
        settle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn an_event_should_not_reach_subscribers_of_other_kinds() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));

        dispatcher.bus.subscribe(EventKind::NodeFound, counting_handler(counter.clone()));

        let sender = dispatcher.run_event_listener(statistics::Repo::new());
        sender
            .send_event(Event::InfohashFound {
                info_hash: InfoHash::random(),
                announced: false,
            })
            .await;
        settle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_from_one_publisher_should_be_delivered_in_publication_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_clone = order.clone();
        dispatcher.bus.subscribe(
            EventKind::InfohashFound,
            Arc::new(move |event| {
                let order = order_clone.clone();
                async move {
                    if let Event::InfohashFound { info_hash, .. } = event {
                        order.lock().unwrap().push(info_hash);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        let sender = dispatcher.run_event_listener(statistics::Repo::new());

        let hashes: Vec<InfoHash> = (0u8..10).map(|i| InfoHash([i; 20])).collect();
        for hash in &hashes {
            sender.send_event(Event::InfohashFound { info_hash: *hash, announced: false }).await;
        }
        settle().await;

        assert_eq!(*order.lock().unwrap(), hashes);
    }

    #[tokio::test]
    async fn unsubscribing_should_stop_delivery() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));

        let id = dispatcher
            .bus
            .subscribe(EventKind::InfohashFound, counting_handler(counter.clone()));
        dispatcher.bus.unsubscribe(id);

        let sender = dispatcher.run_event_listener(statistics::Repo::new());
        sender
            .send_event(Event::InfohashFound {
                info_hash: InfoHash::random(),
                announced: false,
            })
            .await;
        settle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_failing_handler_should_be_counted_and_not_stop_the_dispatcher() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU64::new(0));

        dispatcher.bus.subscribe(
            EventKind::InfohashFound,
            Arc::new(|_event| {
                async {
                    Err(crate::core::error::Error::Storage {
                        source: crate::storage::error::Error::NotInitialized {
                            location: std::panic::Location::caller(),
                        },
                    })
                }
                .boxed()
            }),
        );
        dispatcher.bus.subscribe(EventKind::InfohashFound, counting_handler(counter.clone()));

        let stats = statistics::Repo::new();
        let sender = dispatcher.run_event_listener(stats.clone());
        sender
            .send_event(Event::InfohashFound {
                info_hash: InfoHash::random(),
                announced: false,
            })
            .await;
        settle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(stats.get_metrics().await.handler_errors, 1);
    }

    #[test]
    fn subscribing_from_within_a_handler_snapshot_is_safe() {
        // handlers_for returns a snapshot; mutating the registry while the
        // dispatcher iterates cannot deadlock
        let bus = Arc::new(Bus::new());
        let counter = Arc::new(AtomicU64::new(0));

        let id = bus.subscribe(EventKind::FatalError, counting_handler(counter));
        let handlers = bus.handlers_for(EventKind::FatalError);
        bus.unsubscribe(id);

        assert_eq!(handlers.len(), 1);
    }
}
