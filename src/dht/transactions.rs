//! Correlates outgoing queries with incoming responses.
//!
//! Every outgoing query carries a 2-byte transaction id. Ids come from a
//! wrapping counter and skip ids still outstanding, so two in-flight queries
//! never share one. Completion hands the parsed response (or the remote
//! error) to the waiting sender through a oneshot channel; a caller that
//! gives up cancels its entry.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use super::messages::Response;

/// Default deadline for one query attempt.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// What a completed transaction resolves to: the response, or the error
/// message the remote sent instead.
pub type TransactionResult = Result<Response, RemoteError>;

/// A KRPC error response, delivered to the query sender.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

struct Pending {
    resolver: oneshot::Sender<TransactionResult>,
}

/// The id → transaction map behind a mutex.
pub struct TransactionManager {
    state: Mutex<State>,
}

struct State {
    next_id: u16,
    pending: HashMap<u16, Pending>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Allocates a transaction id and registers a resolver for it. The
    /// returned receiver resolves when a matching response or error arrives;
    /// it stays pending forever if the caller never completes or cancels,
    /// so callers always pair it with a deadline.
    pub fn register(&self) -> (u16, oneshot::Receiver<TransactionResult>) {
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock().expect("the transaction mutex should not be poisoned");

        // skip ids still outstanding; with 2^16 ids and a handful of
        // in-flight queries this loop terminates immediately
        let mut id = state.next_id;
        while state.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);

        state.pending.insert(id, Pending { resolver: tx });

        (id, rx)
    }

    /// Delivers a result to the waiting sender. Returns `false` for unknown
    /// ids, which the engine counts and drops.
    pub fn complete(&self, id: u16, result: TransactionResult) -> bool {
        let pending = {
            let mut state = self.state.lock().expect("the transaction mutex should not be poisoned");
            state.pending.remove(&id)
        };

        match pending {
            Some(pending) => {
                // the receiver may have been dropped on timeout; that is
                // still a known transaction
                drop(pending.resolver.send(result));
                true
            }
            None => false,
        }
    }

    /// Forgets a transaction whose caller gave up on it.
    pub fn cancel(&self, id: u16) {
        let mut state = self.state.lock().expect("the transaction mutex should not be poisoned");
        state.pending.remove(&id);
    }

    /// Number of transactions currently outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().expect("the transaction mutex should not be poisoned");
        state.pending.len()
    }

    /// The id in its 2-byte wire form.
    #[must_use]
    pub fn wire_id(id: u16) -> Vec<u8> {
        id.to_be_bytes().to_vec()
    }

    /// Parses a wire transaction id. Only 2-byte ids can be ours.
    #[must_use]
    pub fn parse_wire_id(bytes: &[u8]) -> Option<u16> {
        let bytes: [u8; 2] = bytes.try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use swarmscan_primitives::node_id::NodeId;

    use super::super::messages::Response;
    use super::{RemoteError, TransactionManager};

    fn response() -> Response {
        Response::only_id(NodeId::random())
    }

    #[tokio::test]
    async fn completing_a_registered_transaction_should_deliver_the_response() {
        let manager = TransactionManager::new();
        let (id, rx) = manager.register();

        assert!(manager.complete(id, Ok(response())));

        let delivered = rx.await.unwrap();
        assert!(delivered.is_ok());
        assert_eq!(manager.outstanding(), 0);
    }

    #[tokio::test]
    async fn a_remote_error_should_be_delivered_as_an_error() {
        let manager = TransactionManager::new();
        let (id, rx) = manager.register();

        manager.complete(
            id,
            Err(RemoteError {
                code: 203,
                message: "Protocol Error".to_string(),
            }),
        );

        assert_eq!(rx.await.unwrap().unwrap_err().code, 203);
    }

    #[test]
    fn completing_an_unknown_id_should_report_false() {
        let manager = TransactionManager::new();

        assert!(!manager.complete(42, Ok(response())));
    }

    #[test]
    fn ids_should_not_repeat_while_outstanding() {
        let manager = TransactionManager::new();

        let mut receivers = Vec::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            let (id, rx) = manager.register();
            receivers.push(rx);
            assert!(ids.insert(id), "id {id} was handed out twice");
        }

        assert_eq!(manager.outstanding(), 1000);
    }

    #[test]
    fn a_cancelled_transaction_should_become_unknown() {
        let manager = TransactionManager::new();
        let (id, _rx) = manager.register();

        manager.cancel(id);

        assert!(!manager.complete(id, Ok(response())));
    }

    #[test]
    fn wire_ids_should_round_trip() {
        assert_eq!(TransactionManager::parse_wire_id(&TransactionManager::wire_id(0xBEEF)), Some(0xBEEF));
        assert_eq!(TransactionManager::parse_wire_id(b"abc"), None);
    }
}
